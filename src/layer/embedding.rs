// layer/embedding.rs
// Description: Token embedding table. Gradients accumulate in a dense arena with a
//              dirty-row list, so applying and clearing them costs O(rows touched).
// History:
// - 2026-02-01: Embeddings layer with Adam step per batch.
// - 2026-10-19: Per-row keyed updates and zero vector for out of range ids.

use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;

use crate::config::WeightInit;
use crate::error::Result;
use crate::math::{init_matrix, GRAD_CLIP};
use crate::optimizer::{Component, Optimizer, ParamKey, ParamRole};

use super::{assign_from, expect_shape, step_optimizer_1d, Trainable};

#[derive(Clone, Debug)]
pub struct Embedding {
    weights: Array2<f32>,
    grads: Array2<f32>,
    dirty: Vec<bool>,
    dirty_rows: Vec<usize>,
}

impl Embedding {
    /// `[vocab_size, embedding_dim]` table scaled by `sqrt(1 / embedding_dim)`.
    pub fn new(i_vocab_size: usize, i_embedding_dim: usize, init: WeightInit, rng: &mut StdRng) -> Result<Self> {
        let a_weights = init_matrix(i_vocab_size, i_embedding_dim, i_embedding_dim, init, rng)?;
        Ok(Self::from_matrix(a_weights))
    }

    /// Rebuilds a table from stored weights, checking them against the expected shape.
    pub fn from_weights(a_weights: Array2<f32>, i_vocab_size: usize, i_embedding_dim: usize) -> Result<Self> {
        expect_shape(&a_weights, (i_vocab_size, i_embedding_dim), "embedding")?;
        Ok(Self::from_matrix(a_weights))
    }

    fn from_matrix(a_weights: Array2<f32>) -> Self {
        let i_rows = a_weights.nrows();
        Self {
            grads: Array2::zeros(a_weights.raw_dim()),
            dirty: vec![false; i_rows],
            dirty_rows: Vec::new(),
            weights: a_weights,
        }
    }

    pub fn weights(&self) -> &Array2<f32> {
        &self.weights
    }

    pub fn vocab_size(&self) -> usize {
        self.weights.nrows()
    }

    pub fn embedding_dim(&self) -> usize {
        self.weights.ncols()
    }

    /// Copy of the row for `i_id`, zeros when the id is out of range.
    pub fn forward(&self, i_id: usize) -> Array1<f32> {
        if i_id < self.weights.nrows() {
            self.weights.row(i_id).to_owned()
        } else {
            Array1::zeros(self.embedding_dim())
        }
    }

    /// `[ids.len(), embedding_dim]` matrix of looked up rows.
    pub fn forward_sequence(&self, v_ids: &[usize]) -> Array2<f32> {
        let mut a_out = Array2::zeros((v_ids.len(), self.embedding_dim()));
        for (i_pos, &i_id) in v_ids.iter().enumerate() {
            if i_id < self.weights.nrows() {
                a_out.row_mut(i_pos).assign(&self.weights.row(i_id));
            }
        }
        a_out
    }

    /// Adds `a_grad` to the accumulator of `i_id`. Out of range ids are ignored.
    pub fn backward(&mut self, i_id: usize, a_grad: ArrayView1<f32>) {
        if i_id >= self.weights.nrows() || a_grad.len() != self.embedding_dim() {
            return;
        }
        let mut a_row = self.grads.row_mut(i_id);
        a_row += &a_grad;
        if !self.dirty[i_id] {
            self.dirty[i_id] = true;
            self.dirty_rows.push(i_id);
        }
    }

    pub fn backward_sequence(&mut self, v_ids: &[usize], a_grads: &Array2<f32>) {
        for (&i_id, a_grad) in v_ids.iter().zip(a_grads.outer_iter()) {
            self.backward(i_id, a_grad);
        }
    }

    /// Ids with a pending gradient, in first-touched order.
    pub fn dirty_rows(&self) -> &[usize] {
        &self.dirty_rows
    }

    pub fn row_gradient(&self, i_id: usize) -> Option<ArrayView1<'_, f32>> {
        if i_id < self.grads.nrows() {
            Some(self.grads.row(i_id))
        } else {
            None
        }
    }
}

impl Trainable for Embedding {
    fn layer_type(&self) -> &str {
        "Embedding"
    }

    fn parameters(&self) -> usize {
        self.weights.len()
    }

    fn zero_grad(&mut self) {
        for &i_id in &self.dirty_rows {
            self.grads.row_mut(i_id).fill(0.0);
            self.dirty[i_id] = false;
        }
        self.dirty_rows.clear();
    }

    fn update_parameters(&mut self, d_lr: f32) {
        for &i_id in &self.dirty_rows {
            let a_grad = self.grads.row(i_id);
            let mut a_row = self.weights.row_mut(i_id);
            a_row.zip_mut_with(&a_grad, |p, &g| *p += d_lr * g.clamp(-GRAD_CLIP, GRAD_CLIP));
        }
        self.zero_grad();
    }

    fn update_with_optimizer(&mut self, optimizer: &mut dyn Optimizer) {
        for &i_id in &self.dirty_rows {
            let key = ParamKey::indexed(Component::Embedding, ParamRole::Row, i_id);
            let mut a_row = self.weights.row(i_id).to_owned();
            let a_grad = self.grads.row(i_id).to_owned();
            step_optimizer_1d(optimizer, key, &mut a_row, &a_grad);
            self.weights.row_mut(i_id).assign(&a_row);
        }
        self.zero_grad();
    }

    fn parameters_flat(&self, v_out: &mut Vec<f32>) {
        v_out.extend(self.weights.iter().copied());
    }

    fn gradients_flat(&self, v_out: &mut Vec<f32>) {
        v_out.extend(self.grads.iter().copied());
    }

    fn assign_parameters_flat(&mut self, v_params: &[f32]) -> Result<usize> {
        let mut i_pos = 0;
        assign_from(&mut self.weights, v_params, &mut i_pos, "embedding")?;
        Ok(i_pos)
    }
}
