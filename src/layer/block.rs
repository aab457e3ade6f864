// layer/block.rs
// Description: Transformer block. attention -> residual -> LayerNorm ->
//              feed forward -> residual -> LayerNorm.
// History:
// - 2026-02-01: TransformerBlock update.
// - 2026-10-19: Residual connections in the block, configurable heads, explicit cache.

use ndarray::Array2;
use rand::rngs::StdRng;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::optimizer::{BlockPart, Component, Optimizer};

use super::{
    Attention, AttentionCache, FeedForward, FeedForwardCache, Layer, LayerNorm, LayerNormCache, Trainable,
};

#[derive(Clone, Debug)]
pub struct BlockCache {
    pub attention: AttentionCache,
    pub norm1: LayerNormCache,
    pub feed_forward: FeedForwardCache,
    pub norm2: LayerNormCache,
}

#[derive(Clone, Debug)]
pub struct TransformerBlock {
    attention: Attention,
    feed_forward: FeedForward,
    norm1: LayerNorm,
    norm2: LayerNorm,
}

pub(crate) fn block_component(i_layer: usize, part: BlockPart) -> Component {
    Component::Block { layer: i_layer, part }
}

impl TransformerBlock {
    pub fn new(i_layer: usize, config: &ModelConfig, rng: &mut StdRng) -> Result<Self> {
        let d = config.embedding_dim;
        let attention = Attention::new(
            d,
            config.num_heads,
            config.causal_mask,
            block_component(i_layer, BlockPart::Attention),
            config.init,
            rng,
        )?;
        let feed_forward = FeedForward::new(
            d,
            config.hidden_dim,
            block_component(i_layer, BlockPart::FeedForward),
            config.init,
            rng,
        )?;
        Ok(Self::from_parts(i_layer, attention, feed_forward, d, None))
    }

    /// Assembles a block from already built sublayers. `norms` are
    /// `(norm1, norm2)`, identity norms when `None`.
    pub fn from_parts(
        i_layer: usize,
        attention: Attention,
        feed_forward: FeedForward,
        i_embedding_dim: usize,
        norms: Option<(LayerNorm, LayerNorm)>,
    ) -> Self {
        let (norm1, norm2) = norms.unwrap_or_else(|| {
            (
                LayerNorm::new(i_embedding_dim, block_component(i_layer, BlockPart::Norm1)),
                LayerNorm::new(i_embedding_dim, block_component(i_layer, BlockPart::Norm2)),
            )
        });
        Self {
            attention,
            feed_forward,
            norm1,
            norm2,
        }
    }

    pub fn attention(&self) -> &Attention {
        &self.attention
    }

    pub fn feed_forward(&self) -> &FeedForward {
        &self.feed_forward
    }

    pub fn norm1(&self) -> &LayerNorm {
        &self.norm1
    }

    pub fn norm2(&self) -> &LayerNorm {
        &self.norm2
    }
}

impl Layer for TransformerBlock {
    type Cache = BlockCache;

    fn forward(&self, a_input: &Array2<f32>) -> (Array2<f32>, BlockCache) {
        let (a_attn, c_attn) = self.attention.forward(a_input);
        let a_r1 = a_input + &a_attn;
        let (a_n1, c_n1) = self.norm1.forward(&a_r1);
        let (a_ff, c_ff) = self.feed_forward.forward(&a_n1);
        let a_r2 = &a_n1 + &a_ff;
        let (a_out, c_n2) = self.norm2.forward(&a_r2);
        (
            a_out,
            BlockCache {
                attention: c_attn,
                norm1: c_n1,
                feed_forward: c_ff,
                norm2: c_n2,
            },
        )
    }

    fn backward(&mut self, a_grads: &Array2<f32>, cache: &BlockCache) -> Array2<f32> {
        let a_g_r2 = self.norm2.backward(a_grads, &cache.norm2);
        // r2 = n1 + ff(n1)
        let a_g_n1 = self.feed_forward.backward(&a_g_r2, &cache.feed_forward) + &a_g_r2;
        let a_g_r1 = self.norm1.backward(&a_g_n1, &cache.norm1);
        // r1 = x + attn(x)
        self.attention.backward(&a_g_r1, &cache.attention) + &a_g_r1
    }
}

impl Trainable for TransformerBlock {
    fn layer_type(&self) -> &str {
        "TransformerBlock"
    }

    fn parameters(&self) -> usize {
        self.attention.parameters()
            + self.feed_forward.parameters()
            + self.norm1.parameters()
            + self.norm2.parameters()
    }

    fn zero_grad(&mut self) {
        self.attention.zero_grad();
        self.feed_forward.zero_grad();
        self.norm1.zero_grad();
        self.norm2.zero_grad();
    }

    fn update_parameters(&mut self, d_lr: f32) {
        self.attention.update_parameters(d_lr);
        self.norm1.update_parameters(d_lr);
        self.feed_forward.update_parameters(d_lr);
        self.norm2.update_parameters(d_lr);
    }

    fn update_with_optimizer(&mut self, optimizer: &mut dyn Optimizer) {
        self.attention.update_with_optimizer(optimizer);
        self.norm1.update_with_optimizer(optimizer);
        self.feed_forward.update_with_optimizer(optimizer);
        self.norm2.update_with_optimizer(optimizer);
    }

    fn parameters_flat(&self, v_out: &mut Vec<f32>) {
        self.attention.parameters_flat(v_out);
        self.norm1.parameters_flat(v_out);
        self.feed_forward.parameters_flat(v_out);
        self.norm2.parameters_flat(v_out);
    }

    fn gradients_flat(&self, v_out: &mut Vec<f32>) {
        self.attention.gradients_flat(v_out);
        self.norm1.gradients_flat(v_out);
        self.feed_forward.gradients_flat(v_out);
        self.norm2.gradients_flat(v_out);
    }

    fn assign_parameters_flat(&mut self, v_params: &[f32]) -> Result<usize> {
        let mut i_used = self.attention.assign_parameters_flat(v_params)?;
        i_used += self.norm1.assign_parameters_flat(&v_params[i_used..])?;
        i_used += self.feed_forward.assign_parameters_flat(&v_params[i_used..])?;
        i_used += self.norm2.assign_parameters_flat(&v_params[i_used..])?;
        Ok(i_used)
    }
}
