// layer/attention.rs
// Description: Scaled dot product self attention in two variants. The single-head
//              variant projects to the full width and has no output projection; the
//              multi-head variant keeps per-head Wq/Wk/Wv of width head_dim and a
//              shared Wo. Residual connections live in TransformerBlock.
// History:
// - 2026-02-01: Correct MHSA backward with causal mask, split and concat heads.
// - 2026-10-19: Per-head weight matrices keyed per head, optional causal mask,
//               single-head variant, explicit caches.
// - 2026-10-19: One cache layout for both variants.

use ndarray::{s, Array2};
use rand::rngs::StdRng;

use crate::config::WeightInit;
use crate::error::{LlmError, Result};
use crate::math::{init_matrix, softmax_backward, softmax_rows};
use crate::optimizer::{Component, Optimizer, ParamKey, ParamRole};

use super::{assign_from, expect_shape, step_clipped, step_optimizer, Layer, Trainable};

/// Intermediate values of one attention head.
#[derive(Clone, Debug)]
pub struct HeadCache {
    pub q: Array2<f32>,
    pub k: Array2<f32>,
    pub v: Array2<f32>,
    /// Softmax weights `[seq, seq]`.
    pub weights: Array2<f32>,
}

struct HeadGrads {
    input: Array2<f32>,
    w_q: Array2<f32>,
    w_k: Array2<f32>,
    w_v: Array2<f32>,
}

fn apply_causal_mask_inplace(a_scores: &mut Array2<f32>) {
    let i_seq_len = a_scores.nrows();
    for i in 0..i_seq_len {
        for j in (i + 1)..a_scores.ncols() {
            a_scores[[i, j]] = f32::NEG_INFINITY;
        }
    }
}

fn head_forward(
    a_input: &Array2<f32>,
    w_q: &Array2<f32>,
    w_k: &Array2<f32>,
    w_v: &Array2<f32>,
    d_scale: f32,
    b_causal: bool,
) -> (Array2<f32>, HeadCache) {
    let a_q = a_input.dot(w_q);
    let a_k = a_input.dot(w_k);
    let a_v = a_input.dot(w_v);

    let mut a_scores = a_q.dot(&a_k.t()) / d_scale;
    if b_causal {
        apply_causal_mask_inplace(&mut a_scores);
    }
    let a_weights = softmax_rows(&a_scores);
    let a_out = a_weights.dot(&a_v);

    (
        a_out,
        HeadCache {
            q: a_q,
            k: a_k,
            v: a_v,
            weights: a_weights,
        },
    )
}

fn head_backward(
    a_input: &Array2<f32>,
    cache: &HeadCache,
    a_grad_out: &Array2<f32>,
    w_q: &Array2<f32>,
    w_k: &Array2<f32>,
    w_v: &Array2<f32>,
    d_scale: f32,
) -> HeadGrads {
    // out = W V
    let a_grad_weights = a_grad_out.dot(&cache.v.t());
    let a_grad_v = cache.weights.t().dot(a_grad_out);

    // W = softmax(scores); masked entries have W = 0 and get zero gradient.
    let a_grad_scores = softmax_backward(&cache.weights, &a_grad_weights) / d_scale;

    // scores = Q K^T / scale
    let a_grad_q = a_grad_scores.dot(&cache.k);
    let a_grad_k = a_grad_scores.t().dot(&cache.q);

    let a_input_t = a_input.t();
    HeadGrads {
        input: a_grad_q.dot(&w_q.t()) + a_grad_k.dot(&w_k.t()) + a_grad_v.dot(&w_v.t()),
        w_q: a_input_t.dot(&a_grad_q),
        w_k: a_input_t.dot(&a_grad_k),
        w_v: a_input_t.dot(&a_grad_v),
    }
}

/// Forward state of either attention variant. The single-head variant stores one
/// head and its output as `concat`.
#[derive(Clone, Debug)]
pub struct AttentionCache {
    pub input: Array2<f32>,
    pub heads: Vec<HeadCache>,
    /// Concatenated head outputs `[seq, embedding_dim]`, input of Wo.
    pub concat: Array2<f32>,
}

// ---------------------------
// SingleHeadAttention
// ---------------------------
#[derive(Clone, Debug)]
pub struct SingleHeadAttention {
    component: Component,
    embedding_dim: usize,
    causal: bool,
    w_q: Array2<f32>,
    w_k: Array2<f32>,
    w_v: Array2<f32>,
    grad_w_q: Array2<f32>,
    grad_w_k: Array2<f32>,
    grad_w_v: Array2<f32>,
}

impl SingleHeadAttention {
    pub fn new(
        i_embedding_dim: usize,
        b_causal: bool,
        component: Component,
        init: WeightInit,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let d = i_embedding_dim;
        let a_w_q = init_matrix(d, d, d, init, rng)?;
        let a_w_k = init_matrix(d, d, d, init, rng)?;
        let a_w_v = init_matrix(d, d, d, init, rng)?;
        Self::from_weights(a_w_q, a_w_k, a_w_v, i_embedding_dim, b_causal, component)
    }

    pub fn from_weights(
        a_w_q: Array2<f32>,
        a_w_k: Array2<f32>,
        a_w_v: Array2<f32>,
        i_embedding_dim: usize,
        b_causal: bool,
        component: Component,
    ) -> Result<Self> {
        let t_shape = (i_embedding_dim, i_embedding_dim);
        expect_shape(&a_w_q, t_shape, "single-head wq")?;
        expect_shape(&a_w_k, t_shape, "single-head wk")?;
        expect_shape(&a_w_v, t_shape, "single-head wv")?;
        Ok(Self {
            component,
            embedding_dim: i_embedding_dim,
            causal: b_causal,
            grad_w_q: Array2::zeros(t_shape),
            grad_w_k: Array2::zeros(t_shape),
            grad_w_v: Array2::zeros(t_shape),
            w_q: a_w_q,
            w_k: a_w_k,
            w_v: a_w_v,
        })
    }

    pub fn w_q(&self) -> &Array2<f32> {
        &self.w_q
    }

    pub fn w_k(&self) -> &Array2<f32> {
        &self.w_k
    }

    pub fn w_v(&self) -> &Array2<f32> {
        &self.w_v
    }

    fn scale(&self) -> f32 {
        (self.embedding_dim as f32).sqrt().max(1e-12)
    }
}

impl Layer for SingleHeadAttention {
    type Cache = AttentionCache;

    fn forward(&self, a_input: &Array2<f32>) -> (Array2<f32>, AttentionCache) {
        let (a_out, head) = head_forward(a_input, &self.w_q, &self.w_k, &self.w_v, self.scale(), self.causal);
        let cache = AttentionCache {
            input: a_input.clone(),
            heads: vec![head],
            concat: a_out.clone(),
        };
        (a_out, cache)
    }

    fn backward(&mut self, a_grads: &Array2<f32>, cache: &AttentionCache) -> Array2<f32> {
        let d_scale = self.scale();
        let mut a_grad_input = Array2::zeros(cache.input.raw_dim());
        for head in cache.heads.iter() {
            let grads = head_backward(&cache.input, head, a_grads, &self.w_q, &self.w_k, &self.w_v, d_scale);
            self.grad_w_q += &grads.w_q;
            self.grad_w_k += &grads.w_k;
            self.grad_w_v += &grads.w_v;
            a_grad_input += &grads.input;
        }
        a_grad_input
    }
}

impl Trainable for SingleHeadAttention {
    fn layer_type(&self) -> &str {
        "SingleHeadAttention"
    }

    fn parameters(&self) -> usize {
        self.w_q.len() + self.w_k.len() + self.w_v.len()
    }

    fn zero_grad(&mut self) {
        self.grad_w_q.fill(0.0);
        self.grad_w_k.fill(0.0);
        self.grad_w_v.fill(0.0);
    }

    fn update_parameters(&mut self, d_lr: f32) {
        step_clipped(&mut self.w_q, &self.grad_w_q, d_lr);
        step_clipped(&mut self.w_k, &self.grad_w_k, d_lr);
        step_clipped(&mut self.w_v, &self.grad_w_v, d_lr);
    }

    fn update_with_optimizer(&mut self, optimizer: &mut dyn Optimizer) {
        let c = self.component;
        step_optimizer(optimizer, ParamKey::new(c, ParamRole::Query), &mut self.w_q, &self.grad_w_q);
        step_optimizer(optimizer, ParamKey::new(c, ParamRole::Key), &mut self.w_k, &self.grad_w_k);
        step_optimizer(optimizer, ParamKey::new(c, ParamRole::Value), &mut self.w_v, &self.grad_w_v);
    }

    fn parameters_flat(&self, v_out: &mut Vec<f32>) {
        v_out.extend(self.w_q.iter().copied());
        v_out.extend(self.w_k.iter().copied());
        v_out.extend(self.w_v.iter().copied());
    }

    fn gradients_flat(&self, v_out: &mut Vec<f32>) {
        v_out.extend(self.grad_w_q.iter().copied());
        v_out.extend(self.grad_w_k.iter().copied());
        v_out.extend(self.grad_w_v.iter().copied());
    }

    fn assign_parameters_flat(&mut self, v_params: &[f32]) -> Result<usize> {
        let mut i_pos = 0;
        assign_from(&mut self.w_q, v_params, &mut i_pos, "single-head wq")?;
        assign_from(&mut self.w_k, v_params, &mut i_pos, "single-head wk")?;
        assign_from(&mut self.w_v, v_params, &mut i_pos, "single-head wv")?;
        Ok(i_pos)
    }
}

// ---------------------------
// MultiHeadAttention
// ---------------------------
#[derive(Clone, Debug)]
pub struct MultiHeadAttention {
    component: Component,
    embedding_dim: usize,
    num_heads: usize,
    head_dim: usize,
    causal: bool,

    // Per head: [embedding_dim, head_dim]
    w_q: Vec<Array2<f32>>,
    w_k: Vec<Array2<f32>>,
    w_v: Vec<Array2<f32>>,
    // [embedding_dim, embedding_dim]
    w_o: Array2<f32>,

    grad_w_q: Vec<Array2<f32>>,
    grad_w_k: Vec<Array2<f32>>,
    grad_w_v: Vec<Array2<f32>>,
    grad_w_o: Array2<f32>,
}

impl MultiHeadAttention {
    pub fn new(
        i_embedding_dim: usize,
        i_num_heads: usize,
        b_causal: bool,
        component: Component,
        init: WeightInit,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let i_head_dim = Self::checked_head_dim(i_embedding_dim, i_num_heads)?;
        let d = i_embedding_dim;

        let mut v_q = Vec::with_capacity(i_num_heads);
        let mut v_k = Vec::with_capacity(i_num_heads);
        let mut v_v = Vec::with_capacity(i_num_heads);
        for _ in 0..i_num_heads {
            v_q.push(init_matrix(d, i_head_dim, d, init, rng)?);
            v_k.push(init_matrix(d, i_head_dim, d, init, rng)?);
            v_v.push(init_matrix(d, i_head_dim, d, init, rng)?);
        }
        let a_w_o = init_matrix(d, d, d, init, rng)?;

        Self::from_weights(v_q, v_k, v_v, a_w_o, i_embedding_dim, i_num_heads, b_causal, component)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_weights(
        v_w_q: Vec<Array2<f32>>,
        v_w_k: Vec<Array2<f32>>,
        v_w_v: Vec<Array2<f32>>,
        a_w_o: Array2<f32>,
        i_embedding_dim: usize,
        i_num_heads: usize,
        b_causal: bool,
        component: Component,
    ) -> Result<Self> {
        let i_head_dim = Self::checked_head_dim(i_embedding_dim, i_num_heads)?;
        let t_head = (i_embedding_dim, i_head_dim);

        for (s_name, v_w) in [("wq", &v_w_q), ("wk", &v_w_k), ("wv", &v_w_v)] {
            if v_w.len() != i_num_heads {
                return Err(LlmError::ShapeMismatch(format!(
                    "multi-head {s_name}: expected {i_num_heads} heads, found {}",
                    v_w.len()
                )));
            }
            for a_w in v_w.iter() {
                expect_shape(a_w, t_head, s_name)?;
            }
        }
        expect_shape(&a_w_o, (i_embedding_dim, i_embedding_dim), "multi-head wo")?;

        let zeros = || vec![Array2::zeros(t_head); i_num_heads];
        Ok(Self {
            component,
            embedding_dim: i_embedding_dim,
            num_heads: i_num_heads,
            head_dim: i_head_dim,
            causal: b_causal,
            grad_w_q: zeros(),
            grad_w_k: zeros(),
            grad_w_v: zeros(),
            grad_w_o: Array2::zeros(a_w_o.raw_dim()),
            w_q: v_w_q,
            w_k: v_w_k,
            w_v: v_w_v,
            w_o: a_w_o,
        })
    }

    fn checked_head_dim(i_embedding_dim: usize, i_num_heads: usize) -> Result<usize> {
        if i_num_heads == 0 || i_embedding_dim % i_num_heads != 0 {
            return Err(LlmError::HeadsMismatch {
                embedding_dim: i_embedding_dim,
                num_heads: i_num_heads,
            });
        }
        Ok(i_embedding_dim / i_num_heads)
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    pub fn w_q(&self) -> &[Array2<f32>] {
        &self.w_q
    }

    pub fn w_k(&self) -> &[Array2<f32>] {
        &self.w_k
    }

    pub fn w_v(&self) -> &[Array2<f32>] {
        &self.w_v
    }

    pub fn w_o(&self) -> &Array2<f32> {
        &self.w_o
    }

    fn scale(&self) -> f32 {
        (self.head_dim as f32).sqrt().max(1e-12)
    }

    fn head_columns(&self, i_head: usize) -> std::ops::Range<usize> {
        let i_start = i_head * self.head_dim;
        i_start..i_start + self.head_dim
    }
}

impl Layer for MultiHeadAttention {
    type Cache = AttentionCache;

    fn forward(&self, a_input: &Array2<f32>) -> (Array2<f32>, AttentionCache) {
        let d_scale = self.scale();
        let mut a_concat = Array2::zeros((a_input.nrows(), self.embedding_dim));
        let mut v_heads = Vec::with_capacity(self.num_heads);

        for i_h in 0..self.num_heads {
            let (a_out, head) = head_forward(
                a_input,
                &self.w_q[i_h],
                &self.w_k[i_h],
                &self.w_v[i_h],
                d_scale,
                self.causal,
            );
            a_concat.slice_mut(s![.., self.head_columns(i_h)]).assign(&a_out);
            v_heads.push(head);
        }

        let a_out = a_concat.dot(&self.w_o);
        (
            a_out,
            AttentionCache {
                input: a_input.clone(),
                heads: v_heads,
                concat: a_concat,
            },
        )
    }

    fn backward(&mut self, a_grads: &Array2<f32>, cache: &AttentionCache) -> Array2<f32> {
        let d_scale = self.scale();

        // proj = concat * w_o
        self.grad_w_o += &cache.concat.t().dot(a_grads);
        let a_grad_concat = a_grads.dot(&self.w_o.t());

        let mut a_grad_input = Array2::zeros(cache.input.raw_dim());
        for (i_h, head) in cache.heads.iter().enumerate().take(self.num_heads) {
            let a_grad_head = a_grad_concat.slice(s![.., self.head_columns(i_h)]).to_owned();
            let grads = head_backward(
                &cache.input,
                head,
                &a_grad_head,
                &self.w_q[i_h],
                &self.w_k[i_h],
                &self.w_v[i_h],
                d_scale,
            );
            self.grad_w_q[i_h] += &grads.w_q;
            self.grad_w_k[i_h] += &grads.w_k;
            self.grad_w_v[i_h] += &grads.w_v;
            a_grad_input += &grads.input;
        }
        a_grad_input
    }
}

impl Trainable for MultiHeadAttention {
    fn layer_type(&self) -> &str {
        "MultiHeadAttention"
    }

    fn parameters(&self) -> usize {
        let i_heads: usize = self
            .w_q
            .iter()
            .chain(self.w_k.iter())
            .chain(self.w_v.iter())
            .map(|a| a.len())
            .sum();
        i_heads + self.w_o.len()
    }

    fn zero_grad(&mut self) {
        for a_g in self
            .grad_w_q
            .iter_mut()
            .chain(self.grad_w_k.iter_mut())
            .chain(self.grad_w_v.iter_mut())
        {
            a_g.fill(0.0);
        }
        self.grad_w_o.fill(0.0);
    }

    fn update_parameters(&mut self, d_lr: f32) {
        for i_h in 0..self.num_heads {
            step_clipped(&mut self.w_q[i_h], &self.grad_w_q[i_h], d_lr);
            step_clipped(&mut self.w_k[i_h], &self.grad_w_k[i_h], d_lr);
            step_clipped(&mut self.w_v[i_h], &self.grad_w_v[i_h], d_lr);
        }
        step_clipped(&mut self.w_o, &self.grad_w_o, d_lr);
    }

    fn update_with_optimizer(&mut self, optimizer: &mut dyn Optimizer) {
        let c = self.component;
        for i_h in 0..self.num_heads {
            let key_q = ParamKey::indexed(c, ParamRole::Query, i_h);
            let key_k = ParamKey::indexed(c, ParamRole::Key, i_h);
            let key_v = ParamKey::indexed(c, ParamRole::Value, i_h);
            step_optimizer(optimizer, key_q, &mut self.w_q[i_h], &self.grad_w_q[i_h]);
            step_optimizer(optimizer, key_k, &mut self.w_k[i_h], &self.grad_w_k[i_h]);
            step_optimizer(optimizer, key_v, &mut self.w_v[i_h], &self.grad_w_v[i_h]);
        }
        step_optimizer(optimizer, ParamKey::new(c, ParamRole::AttnOut), &mut self.w_o, &self.grad_w_o);
    }

    fn parameters_flat(&self, v_out: &mut Vec<f32>) {
        for i_h in 0..self.num_heads {
            v_out.extend(self.w_q[i_h].iter().copied());
            v_out.extend(self.w_k[i_h].iter().copied());
            v_out.extend(self.w_v[i_h].iter().copied());
        }
        v_out.extend(self.w_o.iter().copied());
    }

    fn gradients_flat(&self, v_out: &mut Vec<f32>) {
        for i_h in 0..self.num_heads {
            v_out.extend(self.grad_w_q[i_h].iter().copied());
            v_out.extend(self.grad_w_k[i_h].iter().copied());
            v_out.extend(self.grad_w_v[i_h].iter().copied());
        }
        v_out.extend(self.grad_w_o.iter().copied());
    }

    fn assign_parameters_flat(&mut self, v_params: &[f32]) -> Result<usize> {
        let mut i_pos = 0;
        for i_h in 0..self.num_heads {
            assign_from(&mut self.w_q[i_h], v_params, &mut i_pos, "multi-head wq")?;
            assign_from(&mut self.w_k[i_h], v_params, &mut i_pos, "multi-head wk")?;
            assign_from(&mut self.w_v[i_h], v_params, &mut i_pos, "multi-head wv")?;
        }
        assign_from(&mut self.w_o, v_params, &mut i_pos, "multi-head wo")?;
        Ok(i_pos)
    }
}

// ---------------------------
// Attention (tagged variant)
// ---------------------------
#[derive(Clone, Debug)]
pub enum Attention {
    SingleHead(SingleHeadAttention),
    MultiHead(MultiHeadAttention),
}

impl Attention {
    /// One head builds the single-head variant, more heads the multi-head variant.
    pub fn new(
        i_embedding_dim: usize,
        i_num_heads: usize,
        b_causal: bool,
        component: Component,
        init: WeightInit,
        rng: &mut StdRng,
    ) -> Result<Self> {
        if i_num_heads == 1 {
            Ok(Attention::SingleHead(SingleHeadAttention::new(
                i_embedding_dim,
                b_causal,
                component,
                init,
                rng,
            )?))
        } else {
            Ok(Attention::MultiHead(MultiHeadAttention::new(
                i_embedding_dim,
                i_num_heads,
                b_causal,
                component,
                init,
                rng,
            )?))
        }
    }

    fn inner(&self) -> &dyn Trainable {
        match self {
            Attention::SingleHead(a) => a,
            Attention::MultiHead(a) => a,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Trainable {
        match self {
            Attention::SingleHead(a) => a,
            Attention::MultiHead(a) => a,
        }
    }
}

impl Layer for Attention {
    type Cache = AttentionCache;

    fn forward(&self, a_input: &Array2<f32>) -> (Array2<f32>, AttentionCache) {
        match self {
            Attention::SingleHead(a) => a.forward(a_input),
            Attention::MultiHead(a) => a.forward(a_input),
        }
    }

    fn backward(&mut self, a_grads: &Array2<f32>, cache: &AttentionCache) -> Array2<f32> {
        match self {
            Attention::SingleHead(a) => a.backward(a_grads, cache),
            Attention::MultiHead(a) => a.backward(a_grads, cache),
        }
    }
}

impl Trainable for Attention {
    fn layer_type(&self) -> &str {
        self.inner().layer_type()
    }

    fn parameters(&self) -> usize {
        self.inner().parameters()
    }

    fn zero_grad(&mut self) {
        self.inner_mut().zero_grad();
    }

    fn update_parameters(&mut self, d_lr: f32) {
        self.inner_mut().update_parameters(d_lr);
    }

    fn update_with_optimizer(&mut self, optimizer: &mut dyn Optimizer) {
        self.inner_mut().update_with_optimizer(optimizer);
    }

    fn parameters_flat(&self, v_out: &mut Vec<f32>) {
        self.inner().parameters_flat(v_out);
    }

    fn gradients_flat(&self, v_out: &mut Vec<f32>) {
        self.inner().gradients_flat(v_out);
    }

    fn assign_parameters_flat(&mut self, v_params: &[f32]) -> Result<usize> {
        self.inner_mut().assign_parameters_flat(v_params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::{Adam, BlockPart};
    use ndarray::Array2;
    use rand::SeedableRng;

    fn input(i_rows: usize, i_cols: usize) -> Array2<f32> {
        Array2::from_shape_fn((i_rows, i_cols), |(i, j)| ((i * 7 + j * 3) % 5) as f32 * 0.3 - 0.6)
    }

    fn component() -> Component {
        Component::Block {
            layer: 0,
            part: BlockPart::Attention,
        }
    }

    fn check_input_gradient(layer: &mut Attention, a_x: &Array2<f32>) {
        let a_g = Array2::from_shape_fn(a_x.raw_dim(), |(i, j)| (i as f32 - j as f32) * 0.25 + 0.1);
        let (_, cache) = layer.forward(a_x);
        let a_analytic = layer.backward(&a_g, &cache);

        let d_h = 1e-2f32;
        for i in 0..a_x.nrows() {
            for j in 0..a_x.ncols() {
                let mut a_plus = a_x.clone();
                a_plus[[i, j]] += d_h;
                let mut a_minus = a_x.clone();
                a_minus[[i, j]] -= d_h;
                let d_plus = (layer.forward(&a_plus).0 * &a_g).sum();
                let d_minus = (layer.forward(&a_minus).0 * &a_g).sum();
                let d_numeric = (d_plus - d_minus) / (2.0 * d_h);
                assert!(
                    (a_analytic[[i, j]] - d_numeric).abs() < 2e-2,
                    "({i},{j}): {} vs {}",
                    a_analytic[[i, j]],
                    d_numeric
                );
            }
        }
    }

    #[test]
    fn one_head_selects_single_head_variant() {
        let mut rng = StdRng::seed_from_u64(3);
        let attn = Attention::new(4, 1, false, component(), WeightInit::Xavier, &mut rng).unwrap();
        assert!(matches!(attn, Attention::SingleHead(_)));
        assert_eq!(attn.parameters(), 3 * 16);

        let attn = Attention::new(4, 2, false, component(), WeightInit::Xavier, &mut rng).unwrap();
        assert!(matches!(attn, Attention::MultiHead(_)));
        assert_eq!(attn.parameters(), 3 * 2 * 8 + 16);
    }

    #[test]
    fn indivisible_heads_fail_construction() {
        let mut rng = StdRng::seed_from_u64(3);
        let err = Attention::new(6, 4, false, component(), WeightInit::Xavier, &mut rng).unwrap_err();
        assert!(matches!(err, LlmError::HeadsMismatch { embedding_dim: 6, num_heads: 4 }));
    }

    #[test]
    fn attention_rows_are_distributions() {
        let mut rng = StdRng::seed_from_u64(5);
        let attn = MultiHeadAttention::new(4, 2, false, component(), WeightInit::Xavier, &mut rng).unwrap();
        let (a_out, cache) = attn.forward(&input(3, 4));
        assert_eq!(a_out.dim(), (3, 4));
        for head in &cache.heads {
            for a_row in head.weights.outer_iter() {
                assert!((a_row.sum() - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn causal_mask_hides_future_positions() {
        let mut rng = StdRng::seed_from_u64(5);
        let attn = SingleHeadAttention::new(4, true, component(), WeightInit::Xavier, &mut rng).unwrap();
        let (_, cache) = attn.forward(&input(3, 4));
        let head = &cache.heads[0];
        assert_eq!(head.weights[[0, 1]], 0.0);
        assert_eq!(head.weights[[0, 2]], 0.0);
        assert_eq!(head.weights[[1, 2]], 0.0);
        assert!((head.weights[[0, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn both_variants_share_one_cache_layout() {
        let mut rng = StdRng::seed_from_u64(7);
        let a_x = input(3, 4);
        for i_heads in [1, 2] {
            let mut attn = Attention::new(4, i_heads, false, component(), WeightInit::Xavier, &mut rng).unwrap();
            let (a_out, cache) = attn.forward(&a_x);
            assert_eq!(cache.heads.len(), i_heads);
            assert_eq!(cache.input, a_x);
            if i_heads == 1 {
                assert_eq!(cache.concat, a_out);
            }

            let a_grad_input = attn.backward(&a_out, &cache);
            assert_eq!(a_grad_input.dim(), a_x.dim());
            assert!(a_grad_input.iter().any(|&g| g != 0.0));
            let mut v_grads = Vec::new();
            attn.gradients_flat(&mut v_grads);
            assert!(v_grads.iter().any(|&g| g != 0.0));
        }
    }

    #[test]
    fn single_head_input_gradient_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut attn = Attention::new(4, 1, false, component(), WeightInit::Xavier, &mut rng).unwrap();
        check_input_gradient(&mut attn, &input(3, 4));
    }

    #[test]
    fn multi_head_input_gradient_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(13);
        let mut attn = Attention::new(4, 2, true, component(), WeightInit::Xavier, &mut rng).unwrap();
        check_input_gradient(&mut attn, &input(3, 4));
    }

    #[test]
    fn heads_get_independent_optimizer_state() {
        let mut rng = StdRng::seed_from_u64(17);
        let mut attn = Attention::new(4, 2, false, component(), WeightInit::Xavier, &mut rng).unwrap();
        let a_x = input(2, 4);
        let (a_out, cache) = attn.forward(&a_x);
        attn.backward(&a_out, &cache);

        let mut adam = Adam::new(0.01);
        attn.update_with_optimizer(&mut adam);
        // wq, wk, wv per head plus the shared wo.
        assert_eq!(adam.tracked_parameters(), 2 * 3 + 1);
        let key = ParamKey::indexed(component(), ParamRole::Query, 1);
        assert_eq!(adam.timestep(&key), 1);
    }

    #[test]
    fn zero_grad_clears_accumulators() {
        let mut rng = StdRng::seed_from_u64(19);
        let mut attn = Attention::new(4, 2, false, component(), WeightInit::Xavier, &mut rng).unwrap();
        let (a_out, cache) = attn.forward(&input(2, 4));
        attn.backward(&a_out, &cache);
        attn.zero_grad();
        let mut v_grads = Vec::new();
        attn.gradients_flat(&mut v_grads);
        assert_eq!(v_grads.len(), attn.parameters());
        assert!(v_grads.iter().all(|&g| g == 0.0));
    }
}
