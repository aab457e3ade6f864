// layer/layer_norm.rs
// Description: Per-vector layer normalization with learned gamma and beta.
// History:
// - 2026-02-01: LayerNorm with cached statistics and Adam step.
// - 2026-10-19: Exact closed form backward, gradient accumulators, epsilon 1e-8.

use ndarray::{Array1, Array2, ArrayView1, Axis};

use crate::error::Result;
use crate::optimizer::{Component, Optimizer, ParamKey, ParamRole};

use super::{assign_from, expect_len, step_clipped, step_optimizer_1d, Layer, Trainable};

pub const LAYER_NORM_EPS: f32 = 1e-8;

/// Statistics of one batch forward, row `i` belongs to sequence position `i`.
#[derive(Clone, Debug)]
pub struct LayerNormCache {
    pub normalized: Array2<f32>,
    pub mean: Array1<f32>,
    pub std: Array1<f32>,
}

#[derive(Clone, Debug)]
pub struct LayerNorm {
    component: Component,
    gamma: Array1<f32>,
    beta: Array1<f32>,
    grad_gamma: Array1<f32>,
    grad_beta: Array1<f32>,
}

impl LayerNorm {
    /// Identity transform: `gamma = 1`, `beta = 0`.
    pub fn new(i_dim: usize, component: Component) -> Self {
        Self {
            component,
            gamma: Array1::ones(i_dim),
            beta: Array1::zeros(i_dim),
            grad_gamma: Array1::zeros(i_dim),
            grad_beta: Array1::zeros(i_dim),
        }
    }

    pub fn from_weights(a_gamma: Array1<f32>, a_beta: Array1<f32>, i_dim: usize, component: Component) -> Result<Self> {
        expect_len(&a_gamma, i_dim, "layer norm gamma")?;
        expect_len(&a_beta, i_dim, "layer norm beta")?;
        Ok(Self {
            component,
            grad_gamma: Array1::zeros(i_dim),
            grad_beta: Array1::zeros(i_dim),
            gamma: a_gamma,
            beta: a_beta,
        })
    }

    pub fn gamma(&self) -> &Array1<f32> {
        &self.gamma
    }

    pub fn beta(&self) -> &Array1<f32> {
        &self.beta
    }

    /// Mean, population standard deviation (with epsilon) and normalized vector.
    fn statistics(a_x: ArrayView1<f32>) -> (f32, f32, Array1<f32>) {
        let d_n = a_x.len().max(1) as f32;
        let d_mean = a_x.sum() / d_n;
        let d_var = a_x.iter().map(|&x| (x - d_mean) * (x - d_mean)).sum::<f32>() / d_n;
        let d_std = (d_var + LAYER_NORM_EPS).sqrt();
        let a_normalized = a_x.mapv(|x| (x - d_mean) / d_std);
        (d_mean, d_std, a_normalized)
    }

    /// Normalizes a single vector, no cache.
    pub fn forward_vector(&self, a_x: ArrayView1<f32>) -> Array1<f32> {
        let (_, _, a_normalized) = Self::statistics(a_x);
        &a_normalized * &self.gamma + &self.beta
    }
}

impl Layer for LayerNorm {
    type Cache = LayerNormCache;

    fn forward(&self, a_input: &Array2<f32>) -> (Array2<f32>, LayerNormCache) {
        let i_rows = a_input.nrows();
        let mut a_normalized = Array2::zeros(a_input.raw_dim());
        let mut a_mean = Array1::zeros(i_rows);
        let mut a_std = Array1::zeros(i_rows);

        for (i, a_row) in a_input.outer_iter().enumerate() {
            let (d_mean, d_std, a_norm_row) = Self::statistics(a_row);
            a_mean[i] = d_mean;
            a_std[i] = d_std;
            a_normalized.row_mut(i).assign(&a_norm_row);
        }

        let a_out = &a_normalized * &self.gamma + &self.beta;
        (
            a_out,
            LayerNormCache {
                normalized: a_normalized,
                mean: a_mean,
                std: a_std,
            },
        )
    }

    fn backward(&mut self, a_grads: &Array2<f32>, cache: &LayerNormCache) -> Array2<f32> {
        let a_normalized = &cache.normalized;

        self.grad_gamma += &(a_grads * a_normalized).sum_axis(Axis(0));
        self.grad_beta += &a_grads.sum_axis(Axis(0));

        let a_grad_norm = a_grads * &self.gamma;
        let d_n = a_grads.ncols().max(1) as f32;

        let a_mean_g = (a_grad_norm.sum_axis(Axis(1)) / d_n).insert_axis(Axis(1));
        let a_mean_gn = ((&a_grad_norm * a_normalized).sum_axis(Axis(1)) / d_n).insert_axis(Axis(1));
        let a_std = cache.std.view().insert_axis(Axis(1));

        (&a_grad_norm - &a_mean_g - &(a_normalized * &a_mean_gn)) / &a_std
    }
}

impl Trainable for LayerNorm {
    fn layer_type(&self) -> &str {
        "LayerNorm"
    }

    fn parameters(&self) -> usize {
        self.gamma.len() + self.beta.len()
    }

    fn zero_grad(&mut self) {
        self.grad_gamma.fill(0.0);
        self.grad_beta.fill(0.0);
    }

    fn update_parameters(&mut self, d_lr: f32) {
        step_clipped(&mut self.gamma, &self.grad_gamma, d_lr);
        step_clipped(&mut self.beta, &self.grad_beta, d_lr);
    }

    fn update_with_optimizer(&mut self, optimizer: &mut dyn Optimizer) {
        let key_gamma = ParamKey::new(self.component, ParamRole::Gamma);
        let key_beta = ParamKey::new(self.component, ParamRole::Beta);
        step_optimizer_1d(optimizer, key_gamma, &mut self.gamma, &self.grad_gamma);
        step_optimizer_1d(optimizer, key_beta, &mut self.beta, &self.grad_beta);
    }

    fn parameters_flat(&self, v_out: &mut Vec<f32>) {
        v_out.extend(self.gamma.iter().copied());
        v_out.extend(self.beta.iter().copied());
    }

    fn gradients_flat(&self, v_out: &mut Vec<f32>) {
        v_out.extend(self.grad_gamma.iter().copied());
        v_out.extend(self.grad_beta.iter().copied());
    }

    fn assign_parameters_flat(&mut self, v_params: &[f32]) -> Result<usize> {
        let mut i_pos = 0;
        assign_from(&mut self.gamma, v_params, &mut i_pos, "layer norm gamma")?;
        assign_from(&mut self.beta, v_params, &mut i_pos, "layer norm beta")?;
        Ok(i_pos)
    }
}
