// error.rs
// Description: Crate error type. Soft numeric edge cases never surface here,
//              only structural and configuration violations do.
// History:
// - 2026-10-19: Replace string error codes with a typed error enum.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("embedding_dim {embedding_dim} must be divisible by num_heads {num_heads}")]
    HeadsMismatch { embedding_dim: usize, num_heads: usize },

    #[error("vocabulary is empty")]
    EmptyVocabulary,

    #[error("vocabulary is missing reserved token {0}")]
    MissingReservedToken(&'static str),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("unsupported model format: {0}")]
    UnsupportedFormat(String),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
