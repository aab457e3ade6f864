// lib.rs
// Description: Minimal transformer language model built from scratch on ndarray:
//              word tokenizer, embeddings, single and multi-head attention blocks,
//              SGD / Adam training, greedy and sampled generation, binary model format.
// History:
// - 2026-10-19: Library crate split out of the binary.

pub mod codec;
pub mod config;
pub mod error;
pub mod layer;
pub mod llm;
pub mod math;
pub mod optimizer;
pub mod tokenizer;

pub use codec::{deserialize, serialize};
pub use config::{Decoding, GenerationConfig, ModelConfig, OptimizerConfig, TrainConfig, WeightInit};
pub use error::{LlmError, Result};
pub use llm::{Llm, TrainingProgress, TrainingReport};
pub use optimizer::{Adam, Optimizer, ParamKey, Sgd};
pub use tokenizer::{TrainingSample, Vocabulary};
