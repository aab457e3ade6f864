// layer/positional.rs
// Description: Sinusoidal positional encoding, memoized per position.
// History:
// - 2026-10-19: Memoized sinusoidal encoding per position.

use std::cell::RefCell;

use ndarray::{Array1, Array2};

#[derive(Clone, Debug)]
pub struct PositionalEncoding {
    embedding_dim: usize,
    cache: RefCell<Vec<Array1<f32>>>,
}

impl PositionalEncoding {
    pub fn new(i_embedding_dim: usize) -> Self {
        Self {
            embedding_dim: i_embedding_dim,
            cache: RefCell::new(Vec::new()),
        }
    }

    fn compute(&self, i_position: usize) -> Array1<f32> {
        let d_dim = self.embedding_dim.max(1) as f64;
        let d_pos = i_position as f64;
        Array1::from_shape_fn(self.embedding_dim, |i| {
            let d_exponent = (2 * (i / 2)) as f64 / d_dim;
            let d_angle = d_pos / 10000f64.powf(d_exponent);
            if i % 2 == 0 {
                d_angle.sin() as f32
            } else {
                d_angle.cos() as f32
            }
        })
    }

    /// Even components `sin(pos / 10000^(2*floor(i/2)/d))`, odd components `cos` of the same angle.
    pub fn encoding_for(&self, i_position: usize) -> Array1<f32> {
        let mut v_cache = self.cache.borrow_mut();
        while v_cache.len() <= i_position {
            let a_next = self.compute(v_cache.len());
            v_cache.push(a_next);
        }
        v_cache[i_position].clone()
    }

    /// Adds the encoding of position `i` to row `i`. Identity in the backward pass.
    pub fn add_to_sequence(&self, a_input: &Array2<f32>) -> Array2<f32> {
        let mut a_out = a_input.clone();
        for (i_pos, mut a_row) in a_out.outer_iter_mut().enumerate() {
            a_row += &self.encoding_for(i_pos);
        }
        a_out
    }

    pub fn cached_positions(&self) -> usize {
        self.cache.borrow().len()
    }
}
