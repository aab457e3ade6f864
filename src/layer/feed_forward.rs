// layer/feed_forward.rs
// Description: Position-wise feed forward sublayer, linear -> ReLU -> linear, no biases.
//              The residual connection lives in TransformerBlock.
// History:
// - 2026-02-01: FeedForward with biases, residual and Adam step.
// - 2026-10-19: Drop biases and residual, accumulate gradients, seeded init.

use ndarray::Array2;
use rand::rngs::StdRng;

use crate::config::WeightInit;
use crate::error::Result;
use crate::math::init_matrix;
use crate::optimizer::{Component, Optimizer, ParamKey, ParamRole};

use super::{assign_from, expect_shape, step_clipped, step_optimizer, Layer, Trainable};

#[derive(Clone, Debug)]
pub struct FeedForwardCache {
    pub input: Array2<f32>,
    pub hidden_pre: Array2<f32>,
}

#[derive(Clone, Debug)]
pub struct FeedForward {
    component: Component,
    w1: Array2<f32>,
    w2: Array2<f32>,
    grad_w1: Array2<f32>,
    grad_w2: Array2<f32>,
}

impl FeedForward {
    pub fn new(
        i_embedding_dim: usize,
        i_hidden_dim: usize,
        component: Component,
        init: WeightInit,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let a_w1 = init_matrix(i_embedding_dim, i_hidden_dim, i_embedding_dim, init, rng)?;
        let a_w2 = init_matrix(i_hidden_dim, i_embedding_dim, i_hidden_dim, init, rng)?;
        Ok(Self::from_matrices(a_w1, a_w2, component))
    }

    pub fn from_weights(
        a_w1: Array2<f32>,
        a_w2: Array2<f32>,
        i_embedding_dim: usize,
        i_hidden_dim: usize,
        component: Component,
    ) -> Result<Self> {
        expect_shape(&a_w1, (i_embedding_dim, i_hidden_dim), "feed forward w1")?;
        expect_shape(&a_w2, (i_hidden_dim, i_embedding_dim), "feed forward w2")?;
        Ok(Self::from_matrices(a_w1, a_w2, component))
    }

    fn from_matrices(a_w1: Array2<f32>, a_w2: Array2<f32>, component: Component) -> Self {
        Self {
            component,
            grad_w1: Array2::zeros(a_w1.raw_dim()),
            grad_w2: Array2::zeros(a_w2.raw_dim()),
            w1: a_w1,
            w2: a_w2,
        }
    }

    pub fn w1(&self) -> &Array2<f32> {
        &self.w1
    }

    pub fn w2(&self) -> &Array2<f32> {
        &self.w2
    }

    fn relu(a: &Array2<f32>) -> Array2<f32> {
        a.mapv(|x| x.max(0.0))
    }
}

impl Layer for FeedForward {
    type Cache = FeedForwardCache;

    fn forward(&self, a_input: &Array2<f32>) -> (Array2<f32>, FeedForwardCache) {
        let a_hidden_pre = a_input.dot(&self.w1);
        let a_out = Self::relu(&a_hidden_pre).dot(&self.w2);
        (
            a_out,
            FeedForwardCache {
                input: a_input.clone(),
                hidden_pre: a_hidden_pre,
            },
        )
    }

    fn backward(&mut self, a_grads: &Array2<f32>, cache: &FeedForwardCache) -> Array2<f32> {
        let a_hidden_post = Self::relu(&cache.hidden_pre);
        self.grad_w2 += &a_hidden_post.t().dot(a_grads);

        let a_grad_hidden_post = a_grads.dot(&self.w2.t());
        let a_relu_grad = cache.hidden_pre.mapv(|x| if x > 0.0 { 1.0 } else { 0.0 });
        let a_grad_hidden_pre = a_grad_hidden_post * a_relu_grad;

        self.grad_w1 += &cache.input.t().dot(&a_grad_hidden_pre);
        a_grad_hidden_pre.dot(&self.w1.t())
    }
}

impl Trainable for FeedForward {
    fn layer_type(&self) -> &str {
        "FeedForward"
    }

    fn parameters(&self) -> usize {
        self.w1.len() + self.w2.len()
    }

    fn zero_grad(&mut self) {
        self.grad_w1.fill(0.0);
        self.grad_w2.fill(0.0);
    }

    fn update_parameters(&mut self, d_lr: f32) {
        step_clipped(&mut self.w1, &self.grad_w1, d_lr);
        step_clipped(&mut self.w2, &self.grad_w2, d_lr);
    }

    fn update_with_optimizer(&mut self, optimizer: &mut dyn Optimizer) {
        let key_w1 = ParamKey::new(self.component, ParamRole::Hidden);
        let key_w2 = ParamKey::new(self.component, ParamRole::Projection);
        step_optimizer(optimizer, key_w1, &mut self.w1, &self.grad_w1);
        step_optimizer(optimizer, key_w2, &mut self.w2, &self.grad_w2);
    }

    fn parameters_flat(&self, v_out: &mut Vec<f32>) {
        v_out.extend(self.w1.iter().copied());
        v_out.extend(self.w2.iter().copied());
    }

    fn gradients_flat(&self, v_out: &mut Vec<f32>) {
        v_out.extend(self.grad_w1.iter().copied());
        v_out.extend(self.grad_w2.iter().copied());
    }

    fn assign_parameters_flat(&mut self, v_params: &[f32]) -> Result<usize> {
        let mut i_pos = 0;
        assign_from(&mut self.w1, v_params, &mut i_pos, "feed forward w1")?;
        assign_from(&mut self.w2, v_params, &mut i_pos, "feed forward w2")?;
        Ok(i_pos)
    }
}
