// codec.rs
// Description: Binary model format. A bincode encoded record holding a magic string,
//              a format version, the configuration header, the vocabulary and every
//              weight tensor with its declared shape. Decoding validates every shape
//              against the header and fails instead of truncating or padding.
// History:
// - 2026-02-01: JSON checkpoint with magic and version validation, atomic write.
// - 2026-10-19: Switch to a bincode record with per-tensor shapes and tagged
//               attention variants.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::error::{LlmError, Result};
use crate::layer::{
    Attention, Embedding, FeedForward, LayerNorm, MultiHeadAttention, OutputProjection, SingleHeadAttention,
    TransformerBlock,
};
use crate::llm::Llm;
use crate::optimizer::{BlockPart, Component};
use crate::tokenizer::Vocabulary;

pub const MODEL_MAGIC: &str = "MINILLM_MODEL";
pub const FORMAT_VERSION: u32 = 1;

/// Row major tensor with its declared shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TensorRecord {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl TensorRecord {
    fn from_matrix(a: &Array2<f32>) -> Self {
        Self {
            shape: vec![a.nrows(), a.ncols()],
            data: a.iter().copied().collect(),
        }
    }

    fn from_vector(a: &Array1<f32>) -> Self {
        Self {
            shape: vec![a.len()],
            data: a.to_vec(),
        }
    }

    fn check_len(&self, s_what: &str) -> Result<()> {
        let opt_declared = self.shape.iter().try_fold(1usize, |i_acc, &i_dim| i_acc.checked_mul(i_dim));
        let Some(i_declared) = opt_declared else {
            return Err(LlmError::ShapeMismatch(format!(
                "{s_what}: shape {:?} overflows the addressable size",
                self.shape
            )));
        };
        if i_declared != self.data.len() {
            return Err(LlmError::ShapeMismatch(format!(
                "{s_what}: shape {:?} declares {i_declared} values, buffer holds {}",
                self.shape,
                self.data.len()
            )));
        }
        Ok(())
    }

    fn into_matrix(self, s_what: &str) -> Result<Array2<f32>> {
        self.check_len(s_what)?;
        match self.shape[..] {
            [i_rows, i_cols] => Array2::from_shape_vec((i_rows, i_cols), self.data)
                .map_err(|e| LlmError::ShapeMismatch(format!("{s_what}: {e}"))),
            _ => Err(LlmError::ShapeMismatch(format!(
                "{s_what}: expected a matrix, found shape {:?}",
                self.shape
            ))),
        }
    }

    fn into_vector(self, s_what: &str) -> Result<Array1<f32>> {
        self.check_len(s_what)?;
        if self.shape.len() != 1 {
            return Err(LlmError::ShapeMismatch(format!(
                "{s_what}: expected a vector, found shape {:?}",
                self.shape
            )));
        }
        Ok(Array1::from_vec(self.data))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AttentionRecord {
    #[serde(rename = "single-head")]
    SingleHead {
        w_q: TensorRecord,
        w_k: TensorRecord,
        w_v: TensorRecord,
    },
    #[serde(rename = "multi-head")]
    MultiHead {
        w_q: Vec<TensorRecord>,
        w_k: Vec<TensorRecord>,
        w_v: Vec<TensorRecord>,
        w_o: TensorRecord,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub attention: AttentionRecord,
    pub norm1_gamma: TensorRecord,
    pub norm1_beta: TensorRecord,
    pub w1: TensorRecord,
    pub w2: TensorRecord,
    pub norm2_gamma: TensorRecord,
    pub norm2_beta: TensorRecord,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub magic: String,
    pub version: u32,
    pub vocab_size: usize,
    pub embedding_dim: usize,
    pub num_layers: usize,
    pub num_heads: usize,
    pub config: ModelConfig,
    pub vocabulary: Vec<String>,
    pub embedding: TensorRecord,
    pub blocks: Vec<BlockRecord>,
    pub output_weights: TensorRecord,
    pub output_bias: TensorRecord,
}

impl ModelRecord {
    pub fn from_model(llm: &Llm) -> Self {
        let blocks = llm.blocks().iter().map(block_record).collect();
        Self {
            magic: MODEL_MAGIC.to_string(),
            version: FORMAT_VERSION,
            vocab_size: llm.vocab_size(),
            embedding_dim: llm.embedding_dim(),
            num_layers: llm.num_layers(),
            num_heads: llm.num_heads(),
            config: llm.config().clone(),
            vocabulary: llm.vocabulary().words().to_vec(),
            embedding: TensorRecord::from_matrix(llm.embedding().weights()),
            blocks,
            output_weights: TensorRecord::from_matrix(llm.output().weights()),
            output_bias: TensorRecord::from_vector(llm.output().bias()),
        }
    }

    fn validate_header(&self) -> Result<()> {
        if self.magic != MODEL_MAGIC {
            return Err(LlmError::UnsupportedFormat(format!("bad magic {:?}", self.magic)));
        }
        if self.version != FORMAT_VERSION {
            return Err(LlmError::UnsupportedFormat(format!("version {} not supported", self.version)));
        }
        self.config.validate()?;

        let config = &self.config;
        let v_checks = [
            ("embedding_dim", self.embedding_dim, config.embedding_dim),
            ("num_layers", self.num_layers, config.num_layers),
            ("num_heads", self.num_heads, config.num_heads),
            ("vocabulary", self.vocab_size, self.vocabulary.len()),
            ("blocks", self.num_layers, self.blocks.len()),
        ];
        for (s_what, i_declared, i_found) in v_checks {
            if i_declared != i_found {
                return Err(LlmError::ShapeMismatch(format!(
                    "{s_what}: header declares {i_declared}, found {i_found}"
                )));
            }
        }
        Ok(())
    }

    pub fn into_model(self) -> Result<Llm> {
        self.validate_header()?;

        let vocab = Vocabulary::new(self.vocabulary.iter().cloned());
        if vocab.len() != self.vocab_size {
            return Err(LlmError::ShapeMismatch("vocabulary contains duplicate tokens".to_string()));
        }

        let config = self.config;
        let i_dim = config.embedding_dim;
        let embedding = Embedding::from_weights(self.embedding.into_matrix("embedding")?, self.vocab_size, i_dim)?;

        let blocks = self
            .blocks
            .into_iter()
            .enumerate()
            .map(|(i_layer, record)| block_from_record(i_layer, record, &config))
            .collect::<Result<Vec<_>>>()?;

        let output = OutputProjection::from_weights(
            self.output_weights.into_matrix("output weights")?,
            self.output_bias.into_vector("output bias")?,
            i_dim,
            self.vocab_size,
        )?;

        Llm::from_parts(vocab, config, embedding, blocks, output)
    }
}

fn block_record(block: &TransformerBlock) -> BlockRecord {
    let attention = match block.attention() {
        Attention::SingleHead(a) => AttentionRecord::SingleHead {
            w_q: TensorRecord::from_matrix(a.w_q()),
            w_k: TensorRecord::from_matrix(a.w_k()),
            w_v: TensorRecord::from_matrix(a.w_v()),
        },
        Attention::MultiHead(a) => AttentionRecord::MultiHead {
            w_q: a.w_q().iter().map(TensorRecord::from_matrix).collect(),
            w_k: a.w_k().iter().map(TensorRecord::from_matrix).collect(),
            w_v: a.w_v().iter().map(TensorRecord::from_matrix).collect(),
            w_o: TensorRecord::from_matrix(a.w_o()),
        },
    };
    BlockRecord {
        attention,
        norm1_gamma: TensorRecord::from_vector(block.norm1().gamma()),
        norm1_beta: TensorRecord::from_vector(block.norm1().beta()),
        w1: TensorRecord::from_matrix(block.feed_forward().w1()),
        w2: TensorRecord::from_matrix(block.feed_forward().w2()),
        norm2_gamma: TensorRecord::from_vector(block.norm2().gamma()),
        norm2_beta: TensorRecord::from_vector(block.norm2().beta()),
    }
}

fn matrices(v_records: Vec<TensorRecord>, s_what: &str) -> Result<Vec<Array2<f32>>> {
    v_records.into_iter().map(|r| r.into_matrix(s_what)).collect()
}

fn block_from_record(i_layer: usize, record: BlockRecord, config: &ModelConfig) -> Result<TransformerBlock> {
    let i_dim = config.embedding_dim;
    let component = |part| Component::Block { layer: i_layer, part };

    let attention = match record.attention {
        AttentionRecord::SingleHead { w_q, w_k, w_v } => {
            if config.num_heads != 1 {
                return Err(LlmError::ShapeMismatch(format!(
                    "layer {i_layer}: single-head weights for a {}-head model",
                    config.num_heads
                )));
            }
            Attention::SingleHead(SingleHeadAttention::from_weights(
                w_q.into_matrix("single-head wq")?,
                w_k.into_matrix("single-head wk")?,
                w_v.into_matrix("single-head wv")?,
                i_dim,
                config.causal_mask,
                component(BlockPart::Attention),
            )?)
        }
        AttentionRecord::MultiHead { w_q, w_k, w_v, w_o } => {
            if config.num_heads == 1 {
                return Err(LlmError::ShapeMismatch(format!(
                    "layer {i_layer}: multi-head weights for a single-head model"
                )));
            }
            Attention::MultiHead(MultiHeadAttention::from_weights(
                matrices(w_q, "multi-head wq")?,
                matrices(w_k, "multi-head wk")?,
                matrices(w_v, "multi-head wv")?,
                w_o.into_matrix("multi-head wo")?,
                i_dim,
                config.num_heads,
                config.causal_mask,
                component(BlockPart::Attention),
            )?)
        }
    };

    let feed_forward = FeedForward::from_weights(
        record.w1.into_matrix("feed forward w1")?,
        record.w2.into_matrix("feed forward w2")?,
        i_dim,
        config.hidden_dim,
        component(BlockPart::FeedForward),
    )?;
    let norm1 = LayerNorm::from_weights(
        record.norm1_gamma.into_vector("norm1 gamma")?,
        record.norm1_beta.into_vector("norm1 beta")?,
        i_dim,
        component(BlockPart::Norm1),
    )?;
    let norm2 = LayerNorm::from_weights(
        record.norm2_gamma.into_vector("norm2 gamma")?,
        record.norm2_beta.into_vector("norm2 beta")?,
        i_dim,
        component(BlockPart::Norm2),
    )?;

    Ok(TransformerBlock::from_parts(i_layer, attention, feed_forward, i_dim, Some((norm1, norm2))))
}

/// Encodes the model. Equal weights always give equal bytes.
pub fn serialize(llm: &Llm) -> Result<Vec<u8>> {
    Ok(bincode::serialize(&ModelRecord::from_model(llm))?)
}

pub fn deserialize(v_bytes: &[u8]) -> Result<Llm> {
    let record: ModelRecord = bincode::deserialize(v_bytes)?;
    record.into_model()
}

fn temp_path(path: &Path) -> PathBuf {
    let mut s_tmp: OsString = path.as_os_str().to_owned();
    s_tmp.push(".tmp");
    PathBuf::from(s_tmp)
}

/// Writes to `<path>.tmp` and renames it over `path`.
pub fn save(llm: &Llm, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let v_bytes = serialize(llm)?;
    let tmp = temp_path(path);
    fs::write(&tmp, &v_bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    log::info!("saved model to {} ({} bytes)", path.display(), v_bytes.len());
    Ok(())
}

pub fn load(path: impl AsRef<Path>) -> Result<Llm> {
    let path = path.as_ref();
    let v_bytes = fs::read(path)?;
    let llm = deserialize(&v_bytes)?;
    log::info!("loaded model from {}", path.display());
    Ok(llm)
}
