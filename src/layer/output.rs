// layer/output.rs
// Description: Linear projection from the model width to vocabulary logits.
// History:
// - 2026-02-01: OutputProjection with Adam step.
// - 2026-10-19: Gradient accumulators, keyed optimizer updates, Xavier fan d + V.

use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;

use crate::config::WeightInit;
use crate::error::Result;
use crate::math::{init_matrix, softmax, sum_rows};
use crate::optimizer::{Component, Optimizer, ParamKey, ParamRole};

use super::{assign_from, expect_len, expect_shape, step_clipped, step_optimizer, step_optimizer_1d, Layer, Trainable};

#[derive(Clone, Debug)]
pub struct OutputProjection {
    weights: Array2<f32>,
    bias: Array1<f32>,
    grad_weights: Array2<f32>,
    grad_bias: Array1<f32>,
}

impl OutputProjection {
    /// Weights `[embedding_dim, vocab_size]` scaled by `sqrt(1 / (embedding_dim + vocab_size))`, zero bias.
    pub fn new(i_embedding_dim: usize, i_vocab_size: usize, init: WeightInit, rng: &mut StdRng) -> Result<Self> {
        let i_fan = match init {
            WeightInit::Xavier => i_embedding_dim + i_vocab_size,
            WeightInit::He => i_embedding_dim,
        };
        let a_weights = init_matrix(i_embedding_dim, i_vocab_size, i_fan, init, rng)?;
        Self::from_weights(a_weights, Array1::zeros(i_vocab_size), i_embedding_dim, i_vocab_size)
    }

    pub fn from_weights(
        a_weights: Array2<f32>,
        a_bias: Array1<f32>,
        i_embedding_dim: usize,
        i_vocab_size: usize,
    ) -> Result<Self> {
        expect_shape(&a_weights, (i_embedding_dim, i_vocab_size), "output weights")?;
        expect_len(&a_bias, i_vocab_size, "output bias")?;
        Ok(Self {
            grad_weights: Array2::zeros(a_weights.raw_dim()),
            grad_bias: Array1::zeros(i_vocab_size),
            weights: a_weights,
            bias: a_bias,
        })
    }

    pub fn weights(&self) -> &Array2<f32> {
        &self.weights
    }

    pub fn bias(&self) -> &Array1<f32> {
        &self.bias
    }

    pub fn softmax(a_logits: ArrayView1<f32>) -> Array1<f32> {
        softmax(a_logits)
    }
}

impl Layer for OutputProjection {
    /// The forward input.
    type Cache = Array2<f32>;

    fn forward(&self, a_input: &Array2<f32>) -> (Array2<f32>, Array2<f32>) {
        let a_logits = a_input.dot(&self.weights) + &self.bias;
        (a_logits, a_input.clone())
    }

    fn backward(&mut self, a_grads: &Array2<f32>, a_input: &Array2<f32>) -> Array2<f32> {
        self.grad_weights += &a_input.t().dot(a_grads);
        self.grad_bias += &sum_rows(a_grads);
        a_grads.dot(&self.weights.t())
    }
}

impl Trainable for OutputProjection {
    fn layer_type(&self) -> &str {
        "OutputProjection"
    }

    fn parameters(&self) -> usize {
        self.weights.len() + self.bias.len()
    }

    fn zero_grad(&mut self) {
        self.grad_weights.fill(0.0);
        self.grad_bias.fill(0.0);
    }

    fn update_parameters(&mut self, d_lr: f32) {
        step_clipped(&mut self.weights, &self.grad_weights, d_lr);
        step_clipped(&mut self.bias, &self.grad_bias, d_lr);
    }

    fn update_with_optimizer(&mut self, optimizer: &mut dyn Optimizer) {
        let key_w = ParamKey::new(Component::Output, ParamRole::Weights);
        let key_b = ParamKey::new(Component::Output, ParamRole::Bias);
        step_optimizer(optimizer, key_w, &mut self.weights, &self.grad_weights);
        step_optimizer_1d(optimizer, key_b, &mut self.bias, &self.grad_bias);
    }

    fn parameters_flat(&self, v_out: &mut Vec<f32>) {
        v_out.extend(self.weights.iter().copied());
        v_out.extend(self.bias.iter().copied());
    }

    fn gradients_flat(&self, v_out: &mut Vec<f32>) {
        v_out.extend(self.grad_weights.iter().copied());
        v_out.extend(self.grad_bias.iter().copied());
    }

    fn assign_parameters_flat(&mut self, v_params: &[f32]) -> Result<usize> {
        let mut i_pos = 0;
        assign_from(&mut self.weights, v_params, &mut i_pos, "output weights")?;
        assign_from(&mut self.bias, v_params, &mut i_pos, "output bias")?;
        Ok(i_pos)
    }
}
