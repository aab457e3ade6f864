// config.rs
// Description: Model, optimizer, training and generation configuration.
//              ModelConfig fixes every tensor shape and is stored in the model file.
// History:
// - 2026-10-19: Replace global EMBEDDING_DIM / HIDDEN_DIM constants with ModelConfig.

use serde::{Deserialize, Serialize};

use crate::error::{LlmError, Result};
use crate::optimizer::{Adam, Optimizer, Sgd};

/// Weight initialisation scheme for freshly constructed models.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightInit {
    /// Uniform in `[-s, s]` with `s = sqrt(1 / fan_in)`.
    Xavier,
    /// Normal with `std = sqrt(2 / fan_in)`.
    He,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub embedding_dim: usize,
    pub num_layers: usize,
    pub num_heads: usize,
    pub hidden_dim: usize,
    pub causal_mask: bool,
    pub init: WeightInit,
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::new(32, 2, 4)
    }
}

impl ModelConfig {
    pub fn new(i_embedding_dim: usize, i_num_layers: usize, i_num_heads: usize) -> Self {
        Self {
            embedding_dim: i_embedding_dim,
            num_layers: i_num_layers,
            num_heads: i_num_heads,
            hidden_dim: i_embedding_dim.saturating_mul(4),
            causal_mask: false,
            init: WeightInit::Xavier,
            seed: 42,
        }
    }

    pub fn with_hidden_dim(mut self, i_hidden_dim: usize) -> Self {
        self.hidden_dim = i_hidden_dim;
        self
    }

    pub fn with_causal_mask(mut self, b_causal: bool) -> Self {
        self.causal_mask = b_causal;
        self
    }

    pub fn with_init(mut self, init: WeightInit) -> Self {
        self.init = init;
        self
    }

    pub fn with_seed(mut self, u64_seed: u64) -> Self {
        self.seed = u64_seed;
        self
    }

    /// Width of one attention head.
    pub fn head_dim(&self) -> usize {
        self.embedding_dim / self.num_heads.max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.embedding_dim == 0 {
            return Err(LlmError::InvalidConfig("embedding_dim must be positive".to_string()));
        }
        if self.num_layers == 0 {
            return Err(LlmError::InvalidConfig("num_layers must be positive".to_string()));
        }
        if self.num_heads == 0 {
            return Err(LlmError::InvalidConfig("num_heads must be positive".to_string()));
        }
        if self.hidden_dim == 0 {
            return Err(LlmError::InvalidConfig("hidden_dim must be positive".to_string()));
        }
        if self.embedding_dim % self.num_heads != 0 {
            return Err(LlmError::HeadsMismatch {
                embedding_dim: self.embedding_dim,
                num_heads: self.num_heads,
            });
        }
        Ok(())
    }
}

/// Update rule used by `Llm::train`.
#[derive(Clone, Debug, PartialEq)]
pub enum OptimizerConfig {
    /// No optimizer: every component applies its own clipped `param += lr * grad`.
    Manual { learning_rate: f32 },
    Sgd {
        learning_rate: f32,
        momentum: f32,
        dampening: f32,
        nesterov: bool,
    },
    Adam {
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    },
}

impl OptimizerConfig {
    pub fn manual(d_lr: f32) -> Self {
        OptimizerConfig::Manual { learning_rate: d_lr }
    }

    pub fn sgd(d_lr: f32) -> Self {
        OptimizerConfig::Sgd {
            learning_rate: d_lr,
            momentum: 0.0,
            dampening: 0.0,
            nesterov: false,
        }
    }

    pub fn adam(d_lr: f32) -> Self {
        OptimizerConfig::Adam {
            learning_rate: d_lr,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }

    /// Parses the optimizer kind used by the command line and the training interface.
    pub fn parse(s_kind: &str, d_lr: f32) -> Result<Self> {
        match s_kind.trim().to_lowercase().as_str() {
            "sgd" => Ok(Self::sgd(d_lr)),
            "adam" => Ok(Self::adam(d_lr)),
            "manual" | "none" => Ok(Self::manual(d_lr)),
            other => Err(LlmError::InvalidConfig(format!("unknown optimizer kind: {other}"))),
        }
    }

    pub fn learning_rate(&self) -> f32 {
        match self {
            OptimizerConfig::Manual { learning_rate }
            | OptimizerConfig::Sgd { learning_rate, .. }
            | OptimizerConfig::Adam { learning_rate, .. } => *learning_rate,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let d_lr = self.learning_rate();
        if !d_lr.is_finite() || d_lr <= 0.0 {
            return Err(LlmError::InvalidConfig(format!("invalid learning rate: {d_lr}")));
        }
        if let OptimizerConfig::Adam { beta1, beta2, .. } = self {
            if !(0.0..1.0).contains(beta1) || !(0.0..1.0).contains(beta2) {
                return Err(LlmError::InvalidConfig("adam betas must be in [0, 1)".to_string()));
            }
        }
        Ok(())
    }

    /// Builds the stateful optimizer. `Manual` has none.
    pub fn build(&self) -> Option<Box<dyn Optimizer>> {
        match *self {
            OptimizerConfig::Manual { .. } => None,
            OptimizerConfig::Sgd {
                learning_rate,
                momentum,
                dampening,
                nesterov,
            } => Some(Box::new(Sgd::with_momentum(learning_rate, momentum, dampening, nesterov))),
            OptimizerConfig::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => Some(Box::new(Adam::with_params(learning_rate, beta1, beta2, epsilon))),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrainConfig {
    pub epochs: usize,
    pub optimizer: OptimizerConfig,
}

impl TrainConfig {
    pub fn new(i_epochs: usize, optimizer: OptimizerConfig) -> Self {
        Self {
            epochs: i_epochs,
            optimizer,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Decoding {
    /// Highest probability token, deterministic.
    Greedy,
    /// Sample from `softmax(logits / temperature)`.
    Sample { temperature: f32 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationConfig {
    pub decoding: Decoding,
    pub seed: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            decoding: Decoding::Greedy,
            seed: 0,
        }
    }
}

impl GenerationConfig {
    pub fn sampled(d_temperature: f32, u64_seed: u64) -> Self {
        Self {
            decoding: Decoding::Sample {
                temperature: d_temperature,
            },
            seed: u64_seed,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Decoding::Sample { temperature } = self.decoding {
            if !temperature.is_finite() || temperature <= 0.0 {
                return Err(LlmError::InvalidConfig(format!("invalid temperature: {temperature}")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ModelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.hidden_dim, 128);
        assert_eq!(config.head_dim(), 8);
    }

    #[test]
    fn indivisible_heads_are_rejected() {
        let config = ModelConfig::new(10, 1, 4);
        match config.validate() {
            Err(LlmError::HeadsMismatch {
                embedding_dim,
                num_heads,
            }) => {
                assert_eq!(embedding_dim, 10);
                assert_eq!(num_heads, 4);
            }
            other => panic!("expected HeadsMismatch, got {other:?}"),
        }
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        assert!(ModelConfig::new(0, 1, 1).validate().is_err());
        assert!(ModelConfig::new(8, 0, 1).validate().is_err());
        assert!(ModelConfig::new(8, 1, 0).validate().is_err());
        assert!(ModelConfig::new(8, 1, 1).with_hidden_dim(0).validate().is_err());
    }

    #[test]
    fn optimizer_kind_parsing() {
        assert_eq!(OptimizerConfig::parse("Adam", 0.01).unwrap(), OptimizerConfig::adam(0.01));
        assert_eq!(OptimizerConfig::parse("sgd", 0.1).unwrap(), OptimizerConfig::sgd(0.1));
        assert!(OptimizerConfig::parse("rmsprop", 0.1).is_err());
        assert!(OptimizerConfig::manual(0.1).build().is_none());
        assert_eq!(OptimizerConfig::adam(0.01).build().unwrap().name(), "adam");
    }

    #[test]
    fn learning_rate_must_be_positive() {
        assert!(OptimizerConfig::sgd(0.0).validate().is_err());
        assert!(OptimizerConfig::adam(f32::NAN).validate().is_err());
        assert!(OptimizerConfig::adam(0.001).validate().is_ok());
    }

    #[test]
    fn temperature_must_be_positive() {
        assert!(GenerationConfig::sampled(0.0, 1).validate().is_err());
        assert!(GenerationConfig::sampled(0.8, 1).validate().is_ok());
        assert!(GenerationConfig::default().validate().is_ok());
    }
}
