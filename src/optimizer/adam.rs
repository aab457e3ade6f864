// optimizer/adam.rs
// Description: Adam with bias corrected first and second moments. Each ParamKey owns
//              its moments and its own timestep.
// History:
// - 2026-02-01: Adam step with bias correction per parameter matrix.
// - 2026-10-19: Key the moment state by ParamKey, add 1D updates and reset.

use std::collections::HashMap;

use ndarray::{ArrayView, ArrayView1, ArrayView2, ArrayViewMut, ArrayViewMut1, ArrayViewMut2, Dimension};

use super::{Optimizer, ParamKey};

#[derive(Clone, Debug)]
struct AdamState {
    m: Vec<f32>,
    v: Vec<f32>,
    t: i32,
}

impl AdamState {
    fn new(i_len: usize) -> Self {
        Self {
            m: vec![0.0; i_len],
            v: vec![0.0; i_len],
            t: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    state: HashMap<ParamKey, AdamState>,
}

impl Adam {
    /// Adam with `beta1 = 0.9`, `beta2 = 0.999`, `epsilon = 1e-8`.
    pub fn new(d_lr: f32) -> Self {
        Self::with_params(d_lr, 0.9, 0.999, 1e-8)
    }

    pub fn with_params(d_lr: f32, d_beta1: f32, d_beta2: f32, d_eps: f32) -> Self {
        Self {
            learning_rate: d_lr,
            beta1: d_beta1,
            beta2: d_beta2,
            epsilon: d_eps,
            state: HashMap::new(),
        }
    }

    /// Number of steps taken for `key`, 0 if never updated.
    pub fn timestep(&self, key: &ParamKey) -> i32 {
        self.state.get(key).map_or(0, |s| s.t)
    }

    /// Number of tensors with moment state.
    pub fn tracked_parameters(&self) -> usize {
        self.state.len()
    }

    fn step<D: Dimension>(&mut self, key: ParamKey, mut a_param: ArrayViewMut<f32, D>, a_grad: ArrayView<f32, D>) {
        if a_param.shape() != a_grad.shape() {
            log::warn!("adam: shape mismatch for {key}, update skipped");
            return;
        }

        let (d_lr, d_beta1, d_beta2, d_eps) = (self.learning_rate, self.beta1, self.beta2, self.epsilon);

        let i_len = a_param.len();
        let state = self.state.entry(key).or_insert_with(|| AdamState::new(i_len));
        if state.m.len() != i_len {
            *state = AdamState::new(i_len);
        }

        state.t = state.t.saturating_add(1);
        let d_b1t = 1.0 - d_beta1.powi(state.t);
        let d_b2t = 1.0 - d_beta2.powi(state.t);

        for (((p, &g), m), v) in a_param
            .iter_mut()
            .zip(a_grad.iter())
            .zip(state.m.iter_mut())
            .zip(state.v.iter_mut())
        {
            // m = b1*m + (1-b1)*g
            *m = d_beta1 * *m + (1.0 - d_beta1) * g;
            // v = b2*v + (1-b2)*g^2
            *v = d_beta2 * *v + (1.0 - d_beta2) * g * g;

            let d_m_hat = *m / d_b1t;
            let d_v_hat = *v / d_b2t;
            *p += d_lr * d_m_hat / (d_v_hat.sqrt() + d_eps);
        }
    }
}

impl Optimizer for Adam {
    fn name(&self) -> &str {
        "adam"
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
        self.state.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn first_step_moves_by_learning_rate_in_gradient_direction() {
        let mut adam = Adam::new(0.001);
        let mut a_param = array![[1.0f32, 2.0]];
        adam.update(ParamKey::standalone(0), a_param.view_mut(), array![[1.0f32, 2.0]].view());
        // Bias corrected first step is lr * g / |g|.
        assert!((a_param[[0, 0]] - 1.001).abs() < 1e-5);
        assert!((a_param[[0, 1]] - 2.001).abs() < 1e-5);
    }

    #[test]
    fn converges_on_quadratic() {
        let mut adam = Adam::new(0.1);
        let key = ParamKey::standalone(0);
        let mut a_x = array![[10.0f32]];
        for _ in 0..500 {
            // Descent direction of f(x) = x^2.
            let a_grad = array![[-2.0 * a_x[[0, 0]]]];
            adam.update(key, a_x.view_mut(), a_grad.view());
        }
        assert!(a_x[[0, 0]].abs() < 0.5, "x = {}", a_x[[0, 0]]);
    }

    #[test]
    fn keys_keep_independent_state() {
        let mut adam = Adam::new(0.001);
        let k1 = ParamKey::standalone(1);
        let k2 = ParamKey::standalone(2);
        let mut a_p1 = array![[1.0f32]];
        let mut a_p2 = array![[1.0f32]];
        adam.update(k1, a_p1.view_mut(), array![[1.0f32]].view());
        adam.update(k1, a_p1.view_mut(), array![[1.0f32]].view());
        adam.update(k2, a_p2.view_mut(), array![[1.0f32]].view());
        assert_eq!(adam.timestep(&k1), 2);
        assert_eq!(adam.timestep(&k2), 1);
        assert_eq!(adam.tracked_parameters(), 2);
    }

    #[test]
    fn large_gradients_do_not_explode() {
        let mut adam = Adam::new(0.001);
        let mut a_param = array![1.0f32];
        adam.update_1d(ParamKey::standalone(0), a_param.view_mut(), array![100.0f32].view());
        assert!(a_param[0] > 1.0 && a_param[0] < 1.01);
    }

    #[test]
    fn reset_restarts_bias_correction() {
        let mut adam = Adam::new(0.001);
        let key = ParamKey::standalone(0);
        let mut a_param = array![[1.0f32]];
        adam.update(key, a_param.view_mut(), array![[1.0f32]].view());
        let d_first = a_param[[0, 0]];

        adam.reset();
        assert_eq!(adam.timestep(&key), 0);
        let mut a_again = array![[1.0f32]];
        adam.update(key, a_again.view_mut(), array![[1.0f32]].view());
        assert!((a_again[[0, 0]] - d_first).abs() < 1e-7);
    }
}
