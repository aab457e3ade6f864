// optimizer/sgd.rs
// Description: Stochastic gradient descent with optional momentum, dampening and
//              Nesterov lookahead. Velocity is kept per ParamKey.
// History:
// - 2026-10-19: Add SGD next to Adam.

use std::collections::HashMap;

use ndarray::{ArrayView, ArrayView1, ArrayView2, ArrayViewMut, ArrayViewMut1, ArrayViewMut2, Dimension, Zip};

use super::{Optimizer, ParamKey};

#[derive(Clone, Debug)]
pub struct Sgd {
    learning_rate: f32,
    momentum: f32,
    dampening: f32,
    nesterov: bool,
    velocity: HashMap<ParamKey, Vec<f32>>,
}

impl Sgd {
    /// Plain SGD: `param += lr * grad`.
    pub fn new(d_lr: f32) -> Self {
        Self::with_momentum(d_lr, 0.0, 0.0, false)
    }

    pub fn with_momentum(d_lr: f32, d_momentum: f32, d_dampening: f32, b_nesterov: bool) -> Self {
        Self {
            learning_rate: d_lr,
            momentum: d_momentum,
            dampening: d_dampening,
            nesterov: b_nesterov,
            velocity: HashMap::new(),
        }
    }

    fn step<D: Dimension>(&mut self, key: ParamKey, mut a_param: ArrayViewMut<f32, D>, a_grad: ArrayView<f32, D>) {
        if a_param.shape() != a_grad.shape() {
            log::warn!("sgd: shape mismatch for {key}, update skipped");
            return;
        }

        let d_lr = self.learning_rate;
        if self.momentum == 0.0 {
            Zip::from(&mut a_param).and(&a_grad).for_each(|p, &g| *p += d_lr * g);
            return;
        }

        let d_momentum = self.momentum;
        let d_dampening = self.dampening;
        let b_nesterov = self.nesterov;

        let i_len = a_param.len();
        let v_velocity = self.velocity.entry(key).or_insert_with(|| vec![0.0; i_len]);
        if v_velocity.len() != i_len {
            *v_velocity = vec![0.0; i_len];
        }

        for ((p, &g), v) in a_param.iter_mut().zip(a_grad.iter()).zip(v_velocity.iter_mut()) {
            let d_v = *v * d_momentum + (1.0 - d_dampening) * g;
            *v = d_v;

            if b_nesterov {
                *p += d_lr * (g + d_momentum * d_v);
            } else {
                *p += d_lr * d_v;
            }
        }
    }
}

impl Optimizer for Sgd {
    fn name(&self) -> &str {
        "sgd"
    }

    fn update(&mut self, key: ParamKey, a_param: ArrayViewMut2<f32>, a_grad: ArrayView2<f32>) {
        self.step(key, a_param, a_grad);
    }

    fn update_1d(&mut self, key: ParamKey, a_param: ArrayViewMut1<f32>, a_grad: ArrayView1<f32>) {
        self.step(key, a_param, a_grad);
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, d_lr: f32) {
        self.learning_rate = d_lr;
    }

    fn reset(&mut self) {
        self.velocity.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-5, "{a} != {b}");
    }

    #[test]
    fn plain_step_adds_scaled_gradient() {
        let mut sgd = Sgd::new(0.1);
        let mut a_param = array![[1.0f32, 2.0], [3.0, 4.0]];
        let a_grad = array![[0.1f32, 0.2], [0.3, 0.4]];
        sgd.update(ParamKey::standalone(0), a_param.view_mut(), a_grad.view());
        for (&p, &e) in a_param.iter().zip([1.01f32, 2.02, 3.03, 4.04].iter()) {
            assert_close(p, e);
        }

        let mut a_vec = array![1.0f32, 2.0, 3.0];
        sgd.update_1d(ParamKey::standalone(1), a_vec.view_mut(), array![0.1f32, 0.2, 0.3].view());
        assert_close(a_vec[2], 3.03);
    }

    #[test]
    fn momentum_accumulates_velocity() {
        let mut sgd = Sgd::with_momentum(0.1, 0.9, 0.0, false);
        let key = ParamKey::standalone(0);
        let mut a_param = array![[1.0f32]];
        let a_grad = array![[1.0f32]];

        sgd.update(key, a_param.view_mut(), a_grad.view());
        assert_close(a_param[[0, 0]], 1.1);

        // v = 0.9 * 1.0 + 1.0 = 1.9
        sgd.update(key, a_param.view_mut(), a_grad.view());
        assert_close(a_param[[0, 0]], 1.29);
    }

    #[test]
    fn dampening_and_nesterov() {
        let mut sgd = Sgd::with_momentum(0.1, 0.5, 0.5, true);
        let key = ParamKey::standalone(0);
        let mut a_param = array![0.0f32];
        // v = 0.5 * 0 + 0.5 * 2 = 1; p += 0.1 * (2 + 0.5 * 1)
        sgd.update_1d(key, a_param.view_mut(), array![2.0f32].view());
        assert_close(a_param[0], 0.25);
    }

    #[test]
    fn reset_clears_velocity() {
        let mut sgd = Sgd::with_momentum(0.1, 0.9, 0.0, false);
        let key = ParamKey::standalone(0);
        let mut a_param = array![[1.0f32]];
        sgd.update(key, a_param.view_mut(), array![[1.0f32]].view());
        sgd.reset();

        let mut a_fresh = array![[1.0f32]];
        sgd.update(key, a_fresh.view_mut(), array![[1.0f32]].view());
        assert_close(a_fresh[[0, 0]], 1.1);
    }

    #[test]
    fn shape_mismatch_leaves_parameter_untouched() {
        let mut sgd = Sgd::new(0.1);
        let mut a_param = array![[1.0f32, 1.0]];
        sgd.update(ParamKey::standalone(0), a_param.view_mut(), array![[1.0f32]].view());
        assert_eq!(a_param, array![[1.0f32, 1.0]]);
    }

    #[test]
    fn learning_rate_can_be_changed() {
        let mut sgd = Sgd::new(0.1);
        sgd.set_learning_rate(0.01);
        assert_eq!(sgd.learning_rate(), 0.01);
    }
}
