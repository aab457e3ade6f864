// math.rs
// Description: Numeric helpers shared by the layers: stabilized softmax, softmax
//              Jacobian product, gradient clipping, argmax, weight initialisation.
// History:
// - 2026-10-19: Add epsilon floored softmax and seeded initialisers.

use ndarray::{Array, Array1, Array2, ArrayView1, Axis, Dimension};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::config::WeightInit;
use crate::error::{LlmError, Result};

/// Floor added to softmax denominators.
pub const SOFTMAX_EPS: f32 = 1e-8;

/// Every gradient component is clipped to `[-GRAD_CLIP, GRAD_CLIP]` before an update.
pub const GRAD_CLIP: f32 = 5.0;

/// Softmax of one vector. Subtracts the max before exponentiating; masked `-inf`
/// entries become exact zeros.
pub fn softmax(a_logits: ArrayView1<f32>) -> Array1<f32> {
    let d_max = a_logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !d_max.is_finite() {
        // All entries masked or non finite, nothing to normalize.
        return Array1::zeros(a_logits.len());
    }
    let a_exp = a_logits.mapv(|x| (x - d_max).exp());
    let d_sum = a_exp.sum() + SOFTMAX_EPS;
    a_exp / d_sum
}

/// Row wise softmax of a matrix.
pub fn softmax_rows(a_scores: &Array2<f32>) -> Array2<f32> {
    let mut a_out = Array2::zeros(a_scores.raw_dim());
    for (a_row_in, mut a_row_out) in a_scores.outer_iter().zip(a_out.outer_iter_mut()) {
        a_row_out.assign(&softmax(a_row_in));
    }
    a_out
}

/// Row wise Jacobian-vector product of softmax: `s_i * (g_i - sum_j g_j s_j)`.
pub fn softmax_backward(a_softmax: &Array2<f32>, a_grad_out: &Array2<f32>) -> Array2<f32> {
    let mut a_grad_in = Array2::zeros(a_softmax.raw_dim());
    for i in 0..a_softmax.nrows() {
        let a_row = a_softmax.row(i);
        let a_grow = a_grad_out.row(i);
        let d_dot: f32 = a_row.iter().zip(a_grow.iter()).map(|(&y, &dy)| y * dy).sum();
        for j in 0..a_softmax.ncols() {
            a_grad_in[[i, j]] = a_softmax[[i, j]] * (a_grad_out[[i, j]] - d_dot);
        }
    }
    a_grad_in
}

/// Elementwise clip to `[-d_limit, d_limit]`.
pub fn clip_gradients<D: Dimension>(a_grads: &Array<f32, D>, d_limit: f32) -> Array<f32, D> {
    a_grads.mapv(|g| g.clamp(-d_limit, d_limit))
}

/// Index of the largest value, first one on ties. `None` for an empty vector.
pub fn argmax(a_values: ArrayView1<f32>) -> Option<usize> {
    let mut opt_best: Option<(usize, f32)> = None;
    for (i, &d) in a_values.iter().enumerate() {
        match opt_best {
            Some((_, d_best)) if d <= d_best || d.is_nan() => {}
            _ => opt_best = Some((i, d)),
        }
    }
    opt_best.map(|(i, _)| i)
}

/// Sum of the rows of `a_x` (gradient of a broadcast bias).
pub fn sum_rows(a_x: &Array2<f32>) -> Array1<f32> {
    a_x.sum_axis(Axis(0))
}

/// Random `[rows, cols]` matrix. `i_fan` sets the scale: `sqrt(1 / fan)` for Xavier,
/// `sqrt(2 / fan)` for He.
pub fn init_matrix(
    i_rows: usize,
    i_cols: usize,
    i_fan: usize,
    init: WeightInit,
    rng: &mut StdRng,
) -> Result<Array2<f32>> {
    let d_fan = i_fan.max(1) as f32;
    match init {
        WeightInit::Xavier => {
            let d_scale = (1.0 / d_fan).sqrt();
            Ok(Array2::from_shape_fn((i_rows, i_cols), |_| {
                (rng.random::<f32>() * 2.0 - 1.0) * d_scale
            }))
        }
        WeightInit::He => {
            let d_std = (2.0 / d_fan).sqrt();
            let normal = Normal::new(0.0, d_std)
                .map_err(|e| LlmError::InvalidConfig(format!("weight init: {e}")))?;
            Ok(Array2::from_shape_fn((i_rows, i_cols), |_| normal.sample(&mut *rng)))
        }
    }
}
