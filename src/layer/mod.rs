// layer/mod.rs
// Description: Model components and the traits they share. Forward passes take &self
//              and hand back an explicit cache; backward passes accumulate gradients
//              into the component and return the gradient for the previous layer.
// History:
// - 2026-02-01: Consolidate layers, Adam and checkpoint hooks in one file.
// - 2026-10-19: Split into one file per component, move optimizer state out of the
//               layers, add zero_grad and keyed optimizer updates.
//
// Gradients hold descent directions (negative loss gradient), so every update adds
// `lr * grad`.

pub mod attention;
pub mod block;
pub mod embedding;
pub mod feed_forward;
pub mod layer_norm;
pub mod output;
pub mod positional;

use ndarray::{Array, Array1, Array2, Dimension, Zip};

use crate::error::{LlmError, Result};
use crate::math::{clip_gradients, GRAD_CLIP};
use crate::optimizer::{Optimizer, ParamKey};

pub use attention::{Attention, AttentionCache, HeadCache, MultiHeadAttention, SingleHeadAttention};
pub use block::{BlockCache, TransformerBlock};
pub use embedding::Embedding;
pub use feed_forward::{FeedForward, FeedForwardCache};
pub use layer_norm::{LayerNorm, LayerNormCache};
pub use output::OutputProjection;
pub use positional::PositionalEncoding;

/// Parameter bookkeeping shared by every component with weights.
pub trait Trainable {
    fn layer_type(&self) -> &str;

    fn parameters(&self) -> usize;

    /// Clears every gradient accumulator.
    fn zero_grad(&mut self);

    /// Clipped `param += lr * grad` on every tensor, no optimizer state.
    fn update_parameters(&mut self, d_lr: f32);

    /// Clips every gradient and hands it to `optimizer` under the tensor's key.
    fn update_with_optimizer(&mut self, optimizer: &mut dyn Optimizer);

    /// Appends all weights in a fixed order.
    fn parameters_flat(&self, v_out: &mut Vec<f32>);

    /// Appends all gradient accumulators in the order of `parameters_flat`.
    fn gradients_flat(&self, v_out: &mut Vec<f32>);

    /// Overwrites the weights from the front of `v_params`, returns how many were used.
    fn assign_parameters_flat(&mut self, v_params: &[f32]) -> Result<usize>;
}

/// Sequence-in, sequence-out component. Shapes are `[seq_len, features]`.
pub trait Layer: Trainable {
    type Cache;

    fn forward(&self, a_input: &Array2<f32>) -> (Array2<f32>, Self::Cache);

    /// Accumulates weight gradients, returns the gradient w.r.t. the forward input.
    fn backward(&mut self, a_grads: &Array2<f32>, cache: &Self::Cache) -> Array2<f32>;
}

pub(crate) fn step_clipped<D: Dimension>(a_param: &mut Array<f32, D>, a_grad: &Array<f32, D>, d_lr: f32) {
    Zip::from(a_param)
        .and(a_grad)
        .for_each(|p, &g| *p += d_lr * g.clamp(-GRAD_CLIP, GRAD_CLIP));
}

pub(crate) fn step_optimizer(
    optimizer: &mut dyn Optimizer,
    key: ParamKey,
    a_param: &mut Array2<f32>,
    a_grad: &Array2<f32>,
) {
    let a_clipped = clip_gradients(a_grad, GRAD_CLIP);
    optimizer.update(key, a_param.view_mut(), a_clipped.view());
}

pub(crate) fn step_optimizer_1d(
    optimizer: &mut dyn Optimizer,
    key: ParamKey,
    a_param: &mut Array1<f32>,
    a_grad: &Array1<f32>,
) {
    let a_clipped = clip_gradients(a_grad, GRAD_CLIP);
    optimizer.update_1d(key, a_param.view_mut(), a_clipped.view());
}

/// Copies `a_param.len()` values from `v_params[*i_pos..]` into `a_param`.
pub(crate) fn assign_from<D: Dimension>(
    a_param: &mut Array<f32, D>,
    v_params: &[f32],
    i_pos: &mut usize,
    s_what: &str,
) -> Result<()> {
    let i_end = *i_pos + a_param.len();
    if v_params.len() < i_end {
        return Err(LlmError::ShapeMismatch(format!(
            "{s_what}: need {} values, {} left",
            a_param.len(),
            v_params.len().saturating_sub(*i_pos)
        )));
    }
    for (p, &d) in a_param.iter_mut().zip(&v_params[*i_pos..i_end]) {
        *p = d;
    }
    *i_pos = i_end;
    Ok(())
}

/// Fails unless `a` has exactly `t_shape`.
pub(crate) fn expect_shape(a: &Array2<f32>, t_shape: (usize, usize), s_what: &str) -> Result<()> {
    if a.dim() != t_shape {
        return Err(LlmError::ShapeMismatch(format!(
            "{s_what}: expected {:?}, found {:?}",
            t_shape,
            a.dim()
        )));
    }
    Ok(())
}

pub(crate) fn expect_len(a: &Array1<f32>, i_len: usize, s_what: &str) -> Result<()> {
    if a.len() != i_len {
        return Err(LlmError::ShapeMismatch(format!(
            "{s_what}: expected {i_len} values, found {}",
            a.len()
        )));
    }
    Ok(())
}
