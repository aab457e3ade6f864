// llm.rs
// Description: Model orchestrator. Wires embedding -> positional encoding -> transformer
//              blocks -> output projection, runs the training loop and autoregressive
//              generation.
// History:
// - 2026-02-01: Consolidated training loop into Llm::train with Result based error handling.
// - 2026-10-19: Model built from Vocabulary + ModelConfig, per-sample gradient scope,
//               optimizer selection, training report and hook, masked generation.

use std::ops::ControlFlow;
use std::path::Path;

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::codec;
use crate::config::{Decoding, GenerationConfig, ModelConfig, TrainConfig};
use crate::error::{LlmError, Result};
use crate::layer::{BlockCache, Embedding, Layer, OutputProjection, PositionalEncoding, Trainable, TransformerBlock};
use crate::math::{argmax, softmax};
use crate::optimizer::Optimizer;
use crate::tokenizer::{ReservedIds, TrainingSample, Vocabulary};

/// Lower bound for target probabilities inside `ln`.
const PROB_FLOOR: f32 = 1e-10;

/// Reported to the training hook after every sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrainingProgress {
    pub epoch: usize,
    pub epochs: usize,
    pub sample: usize,
    pub samples: usize,
    /// `None` when the sample was skipped.
    pub loss: Option<f32>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrainingReport {
    /// Average `-ln p(target)` per epoch that used at least one sample.
    pub epoch_losses: Vec<f32>,
    pub samples_used: usize,
    pub samples_skipped: usize,
    pub stopped_early: bool,
}

impl TrainingReport {
    pub fn final_loss(&self) -> Option<f32> {
        self.epoch_losses.last().copied()
    }
}

struct ForwardCache {
    blocks: Vec<BlockCache>,
    output: Array2<f32>,
}

enum Updater<'a> {
    Manual(f32),
    Optimizer(&'a mut dyn Optimizer),
}

#[derive(Clone, Debug)]
pub struct Llm {
    config: ModelConfig,
    vocab: Vocabulary,
    reserved: ReservedIds,
    embedding: Embedding,
    positional: PositionalEncoding,
    blocks: Vec<TransformerBlock>,
    output: OutputProjection,
}

impl Llm {
    /// Builds a model with seeded random weights. Fails on an invalid config, an empty
    /// vocabulary, or a vocabulary without `[PAD]`, `[UNK]` and `[EOS]`.
    pub fn new(vocab: Vocabulary, config: ModelConfig) -> Result<Self> {
        config.validate()?;
        let reserved = vocab.reserved_ids()?;

        let mut rng = StdRng::seed_from_u64(config.seed);
        let embedding = Embedding::new(vocab.len(), config.embedding_dim, config.init, &mut rng)?;
        let blocks = (0..config.num_layers)
            .map(|i_layer| TransformerBlock::new(i_layer, &config, &mut rng))
            .collect::<Result<Vec<_>>>()?;
        let output = OutputProjection::new(config.embedding_dim, vocab.len(), config.init, &mut rng)?;

        log::debug!(
            "model: vocab {}, dim {}, layers {}, heads {}",
            vocab.len(),
            config.embedding_dim,
            config.num_layers,
            config.num_heads
        );

        Ok(Self {
            positional: PositionalEncoding::new(config.embedding_dim),
            config,
            vocab,
            reserved,
            embedding,
            blocks,
            output,
        })
    }

    /// Assembles a model from stored components. Shapes were checked by the components.
    pub(crate) fn from_parts(
        vocab: Vocabulary,
        config: ModelConfig,
        embedding: Embedding,
        blocks: Vec<TransformerBlock>,
        output: OutputProjection,
    ) -> Result<Self> {
        config.validate()?;
        let reserved = vocab.reserved_ids()?;
        if blocks.len() != config.num_layers {
            return Err(LlmError::ShapeMismatch(format!(
                "expected {} transformer blocks, found {}",
                config.num_layers,
                blocks.len()
            )));
        }
        Ok(Self {
            positional: PositionalEncoding::new(config.embedding_dim),
            config,
            vocab,
            reserved,
            embedding,
            blocks,
            output,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        codec::load(path)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        codec::save(self, path)
    }

    // ---------------------------
    // Introspection
    // ---------------------------
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn embedding_dim(&self) -> usize {
        self.config.embedding_dim
    }

    pub fn num_layers(&self) -> usize {
        self.config.num_layers
    }

    pub fn num_heads(&self) -> usize {
        self.config.num_heads
    }

    pub fn embedding(&self) -> &Embedding {
        &self.embedding
    }

    pub fn blocks(&self) -> &[TransformerBlock] {
        &self.blocks
    }

    pub fn output(&self) -> &OutputProjection {
        &self.output
    }

    fn trainables(&self) -> Vec<&dyn Trainable> {
        let mut v: Vec<&dyn Trainable> = Vec::with_capacity(self.blocks.len() + 2);
        v.push(&self.embedding);
        for block in self.blocks.iter() {
            v.push(block);
        }
        v.push(&self.output);
        v
    }

    fn trainables_mut(&mut self) -> Vec<&mut dyn Trainable> {
        let mut v: Vec<&mut dyn Trainable> = Vec::with_capacity(self.blocks.len() + 2);
        v.push(&mut self.embedding);
        for block in self.blocks.iter_mut() {
            v.push(block);
        }
        v.push(&mut self.output);
        v
    }

    pub fn network_description(&self) -> String {
        self.trainables()
            .iter()
            .map(|l| l.layer_type())
            .collect::<Vec<&str>>()
            .join(", ")
    }

    pub fn total_parameters(&self) -> usize {
        self.trainables().iter().map(|l| l.parameters()).sum()
    }

    /// Every weight: embedding, blocks in order, output projection.
    pub fn parameters_flat(&self) -> Vec<f32> {
        let mut v_params = Vec::with_capacity(self.total_parameters());
        for layer in self.trainables() {
            layer.parameters_flat(&mut v_params);
        }
        v_params
    }

    /// Gradient accumulators in the order of `parameters_flat`.
    pub fn gradients_flat(&self) -> Vec<f32> {
        let mut v_grads = Vec::with_capacity(self.total_parameters());
        for layer in self.trainables() {
            layer.gradients_flat(&mut v_grads);
        }
        v_grads
    }

    /// Overwrites every weight. `v_params` must have exactly `total_parameters()` values.
    pub fn assign_parameters_flat(&mut self, v_params: &[f32]) -> Result<()> {
        if v_params.len() != self.total_parameters() {
            return Err(LlmError::ShapeMismatch(format!(
                "expected {} parameters, found {}",
                self.total_parameters(),
                v_params.len()
            )));
        }
        let mut i_pos = 0;
        for layer in self.trainables_mut() {
            i_pos += layer.assign_parameters_flat(&v_params[i_pos..])?;
        }
        Ok(())
    }

    pub fn zero_grad(&mut self) {
        for layer in self.trainables_mut() {
            layer.zero_grad();
        }
    }

    // ---------------------------
    // Forward
    // ---------------------------
    fn forward(&self, v_ids: &[usize]) -> (Array2<f32>, ForwardCache) {
        let a_embedded = self.embedding.forward_sequence(v_ids);
        let mut a_act = self.positional.add_to_sequence(&a_embedded);

        let mut v_caches = Vec::with_capacity(self.blocks.len());
        for block in self.blocks.iter() {
            let (a_next, cache) = block.forward(&a_act);
            v_caches.push(cache);
            a_act = a_next;
        }

        let (a_logits, c_output) = self.output.forward(&a_act);
        (
            a_logits,
            ForwardCache {
                blocks: v_caches,
                output: c_output,
            },
        )
    }

    /// Encoded prompt, or `[BOS]` alone when the prompt has no tokens and the
    /// vocabulary has one.
    fn prompt_ids(&self, s_prompt: &str) -> Vec<usize> {
        let v_ids = self.vocab.encode(s_prompt);
        match (v_ids.is_empty(), self.reserved.bos) {
            (true, Some(i_bos)) => vec![i_bos],
            _ => v_ids,
        }
    }

    /// Unmasked next-token distribution after `s_prompt`. `None` when there is no context.
    pub fn next_token_probabilities(&self, s_prompt: &str) -> Option<Array1<f32>> {
        let v_ids = self.prompt_ids(s_prompt);
        if v_ids.is_empty() {
            return None;
        }
        let (a_logits, _) = self.forward(&v_ids);
        Some(softmax(a_logits.row(v_ids.len() - 1)))
    }

    fn encode_sample(&self, sample: &TrainingSample) -> Option<(Vec<usize>, Vec<usize>)> {
        let v_input = self.vocab.encode(&sample.input);
        let v_target = self.vocab.encode(&sample.target);
        if v_input.is_empty() || v_target.is_empty() {
            return None;
        }
        Some((v_input, v_target))
    }

    /// Mean `-ln p(target)` over the scored positions, `None` for a degenerate sample.
    pub fn loss(&self, sample: &TrainingSample) -> Option<f32> {
        let (v_input, v_target) = self.encode_sample(sample)?;
        let i_len = v_input.len().min(v_target.len());
        let (a_logits, _) = self.forward(&v_input);

        let mut d_loss = 0.0;
        for i_pos in 0..i_len {
            let a_probs = softmax(a_logits.row(i_pos));
            d_loss -= a_probs[v_target[i_pos]].max(PROB_FLOOR).ln();
        }
        Some(d_loss / i_len as f32)
    }

    // ---------------------------
    // Training
    // ---------------------------
    /// Zeroes every accumulator, then runs forward and backward for one sample. Afterwards
    /// the accumulators hold the descent direction `-dL/dparam`. Returns the sample loss,
    /// `None` (and no gradient) when input or target has no tokens.
    pub fn accumulate_gradients(&mut self, sample: &TrainingSample) -> Option<f32> {
        self.zero_grad();
        let (v_input, v_target) = self.encode_sample(sample)?;

        // Excess target tokens are ignored.
        let i_len = v_input.len().min(v_target.len());
        let d_n = i_len as f32;

        let (a_logits, cache) = self.forward(&v_input);

        let mut a_grad = Array2::<f32>::zeros(a_logits.raw_dim());
        let mut d_loss = 0.0;
        for i_pos in 0..i_len {
            let a_probs = softmax(a_logits.row(i_pos));
            let i_target = v_target[i_pos];
            d_loss -= a_probs[i_target].max(PROB_FLOOR).ln();

            // (one_hot - probs) / n
            let mut a_row = a_grad.row_mut(i_pos);
            a_row.assign(&(a_probs / -d_n));
            a_row[i_target] += 1.0 / d_n;
        }

        let mut a_back = self.output.backward(&a_grad, &cache.output);
        for (block, c_block) in self.blocks.iter_mut().zip(cache.blocks.iter()).rev() {
            a_back = block.backward(&a_back, c_block);
        }
        // Positional encoding is the identity in the backward pass.
        self.embedding.backward_sequence(&v_input, &a_back);

        Some(d_loss / d_n)
    }

    fn apply_update(&mut self, updater: &mut Updater<'_>) {
        match updater {
            Updater::Manual(d_lr) => {
                let d_lr = *d_lr;
                for layer in self.trainables_mut() {
                    layer.update_parameters(d_lr);
                }
            }
            Updater::Optimizer(optimizer) => {
                for layer in self.trainables_mut() {
                    layer.update_with_optimizer(&mut **optimizer);
                }
            }
        }
    }

    /// Trains in place with the optimizer described by `config`.
    pub fn train(&mut self, samples: &[TrainingSample], config: &TrainConfig) -> Result<TrainingReport> {
        self.train_with_hook(samples, config, |_| ControlFlow::Continue(()))
    }

    /// Like `train`, calling `hook` after every sample. `ControlFlow::Break` stops
    /// training before the next sample.
    pub fn train_with_hook<F>(
        &mut self,
        samples: &[TrainingSample],
        config: &TrainConfig,
        hook: F,
    ) -> Result<TrainingReport>
    where
        F: FnMut(TrainingProgress) -> ControlFlow<()>,
    {
        config.optimizer.validate()?;
        match config.optimizer.build() {
            Some(mut optimizer) => {
                log::debug!(
                    "training {} epochs with {} (lr {})",
                    config.epochs,
                    optimizer.name(),
                    optimizer.learning_rate()
                );
                let mut updater = Updater::Optimizer(optimizer.as_mut());
                self.run_training(samples, config.epochs, &mut updater, hook)
            }
            None => {
                let d_lr = config.optimizer.learning_rate();
                log::debug!("training {} epochs with manual updates (lr {})", config.epochs, d_lr);
                let mut updater = Updater::Manual(d_lr);
                self.run_training(samples, config.epochs, &mut updater, hook)
            }
        }
    }

    /// Trains with a caller owned optimizer, keeping its moment state across calls.
    pub fn train_with_optimizer(
        &mut self,
        samples: &[TrainingSample],
        i_epochs: usize,
        optimizer: &mut dyn Optimizer,
    ) -> Result<TrainingReport> {
        let d_lr = optimizer.learning_rate();
        if !d_lr.is_finite() || d_lr <= 0.0 {
            return Err(LlmError::InvalidConfig(format!("invalid learning rate: {d_lr}")));
        }
        let mut updater = Updater::Optimizer(optimizer);
        self.run_training(samples, i_epochs, &mut updater, |_| ControlFlow::Continue(()))
    }

    fn run_training<F>(
        &mut self,
        samples: &[TrainingSample],
        i_epochs: usize,
        updater: &mut Updater<'_>,
        mut hook: F,
    ) -> Result<TrainingReport>
    where
        F: FnMut(TrainingProgress) -> ControlFlow<()>,
    {
        if self.vocab.is_empty() {
            return Err(LlmError::EmptyVocabulary);
        }

        let mut report = TrainingReport::default();

        'epochs: for i_epoch in 0..i_epochs {
            let mut d_total_loss: f32 = 0.0;
            let mut i_used: usize = 0;

            for (i_sample, sample) in samples.iter().enumerate() {
                let opt_loss = self.accumulate_gradients(sample);
                match opt_loss {
                    Some(d_loss) => {
                        self.apply_update(updater);
                        d_total_loss += d_loss;
                        i_used += 1;
                        report.samples_used += 1;
                        log::debug!("epoch {i_epoch} sample {i_sample}: loss {d_loss:.4}");
                    }
                    None => {
                        report.samples_skipped += 1;
                        if i_epoch == 0 {
                            log::warn!("skipping sample {i_sample}: input or target has no tokens");
                        }
                    }
                }

                let progress = TrainingProgress {
                    epoch: i_epoch,
                    epochs: i_epochs,
                    sample: i_sample,
                    samples: samples.len(),
                    loss: opt_loss,
                };
                if hook(progress).is_break() {
                    report.stopped_early = true;
                    Self::close_epoch(&mut report, i_epoch, d_total_loss, i_used);
                    log::info!("training stopped after epoch {i_epoch} sample {i_sample}");
                    break 'epochs;
                }
            }

            Self::close_epoch(&mut report, i_epoch, d_total_loss, i_used);
        }

        Ok(report)
    }

    fn close_epoch(report: &mut TrainingReport, i_epoch: usize, d_total_loss: f32, i_used: usize) {
        if i_used == 0 {
            log::warn!("Epoch {}: no usable samples", i_epoch);
            return;
        }
        let d_avg_loss = d_total_loss / i_used as f32;
        log::info!("Epoch {}: Loss = {:.4}", i_epoch, d_avg_loss);
        report.epoch_losses.push(d_avg_loss);
    }

    // ---------------------------
    // Generation
    // ---------------------------
    /// Greedy continuation of `s_prompt`, at most `i_max_new_tokens` words.
    pub fn predict(&self, s_prompt: &str, i_max_new_tokens: usize) -> Result<String> {
        self.predict_with(s_prompt, i_max_new_tokens, &GenerationConfig::default())
    }

    pub fn predict_with(&self, s_prompt: &str, i_max_new_tokens: usize, generation: &GenerationConfig) -> Result<String> {
        let v_ids = self.generate_ids(s_prompt, i_max_new_tokens, generation)?;
        Ok(self.vocab.decode(&v_ids))
    }

    /// Generated ids, without the prompt and without the terminating `[EOS]`.
    pub fn generate_ids(
        &self,
        s_prompt: &str,
        i_max_new_tokens: usize,
        generation: &GenerationConfig,
    ) -> Result<Vec<usize>> {
        if self.vocab.is_empty() {
            return Err(LlmError::EmptyVocabulary);
        }
        generation.validate()?;

        let mut v_context = self.prompt_ids(s_prompt);
        let mut v_generated: Vec<usize> = Vec::new();
        if v_context.is_empty() {
            log::debug!("prompt has no tokens, nothing to generate");
            return Ok(v_generated);
        }

        let mut rng = StdRng::seed_from_u64(generation.seed);

        for i_step in 0..i_max_new_tokens {
            // The whole sequence is re-embedded every step.
            let (a_logits, _) = self.forward(&v_context);
            let mut a_last = a_logits.row(v_context.len() - 1).to_owned();
            if let Decoding::Sample { temperature } = generation.decoding {
                a_last /= temperature;
            }

            let mut a_probs = softmax(a_last.view());
            self.mask_reserved(&mut a_probs);
            let d_mass = a_probs.sum();
            if !d_mass.is_finite() || d_mass <= 0.0 {
                log::debug!("step {i_step}: every candidate is masked, stopping");
                break;
            }
            a_probs /= d_mass;

            let opt_next = match generation.decoding {
                Decoding::Greedy => argmax(a_probs.view()),
                Decoding::Sample { .. } => sample_index(&a_probs, rng.random::<f32>()),
            };
            let Some(i_next) = opt_next else {
                break;
            };
            log::trace!("step {i_step}: token {i_next} p={:.4}", a_probs[i_next]);

            if i_next == self.reserved.eos {
                break;
            }
            v_generated.push(i_next);
            v_context.push(i_next);
        }

        Ok(v_generated)
    }

    /// Zeroes `[PAD]`, `[UNK]` and `[BOS]`. `[EOS]` stays, it is the stop token.
    fn mask_reserved(&self, a_probs: &mut Array1<f32>) {
        a_probs[self.reserved.pad] = 0.0;
        a_probs[self.reserved.unk] = 0.0;
        if let Some(i_bos) = self.reserved.bos {
            a_probs[i_bos] = 0.0;
        }
    }
}

/// First index whose cumulative probability exceeds `d_r`.
fn sample_index(a_probs: &Array1<f32>, d_r: f32) -> Option<usize> {
    let mut d_cum = 0.0;
    let mut opt_last = None;
    for (i, &p) in a_probs.iter().enumerate() {
        if p <= 0.0 {
            continue;
        }
        d_cum += p;
        opt_last = Some(i);
        if d_r < d_cum {
            return Some(i);
        }
    }
    opt_last
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizerConfig;
    use crate::tokenizer::S_BOS;
    use ndarray::array;

    fn tiny_vocab() -> Vocabulary {
        Vocabulary::new(["[PAD]", "[UNK]", "[EOS]", "a", "b"])
    }

    fn tiny_model() -> Llm {
        Llm::new(tiny_vocab(), ModelConfig::new(4, 1, 1)).unwrap()
    }

    #[test]
    fn construction_validates_vocabulary_and_heads() {
        assert!(matches!(
            Llm::new(Vocabulary::default(), ModelConfig::new(4, 1, 1)),
            Err(LlmError::EmptyVocabulary)
        ));
        assert!(matches!(
            Llm::new(Vocabulary::new(["a", "b"]), ModelConfig::new(4, 1, 1)),
            Err(LlmError::MissingReservedToken(_))
        ));
        assert!(matches!(
            Llm::new(tiny_vocab(), ModelConfig::new(6, 1, 4)),
            Err(LlmError::HeadsMismatch { .. })
        ));
    }

    #[test]
    fn same_seed_gives_identical_weights() {
        let a = tiny_model();
        let b = tiny_model();
        assert_eq!(a.parameters_flat(), b.parameters_flat());
        let c = Llm::new(tiny_vocab(), ModelConfig::new(4, 1, 1).with_seed(7)).unwrap();
        assert_ne!(a.parameters_flat(), c.parameters_flat());
    }

    #[test]
    fn introspection_reports_shapes() {
        let llm = Llm::new(tiny_vocab(), ModelConfig::new(4, 2, 2).with_hidden_dim(8)).unwrap();
        assert_eq!(llm.vocab_size(), 5);
        assert_eq!(llm.embedding_dim(), 4);
        assert_eq!(llm.num_layers(), 2);
        assert_eq!(llm.num_heads(), 2);
        assert_eq!(
            llm.network_description(),
            "Embedding, TransformerBlock, TransformerBlock, OutputProjection"
        );
        assert_eq!(llm.parameters_flat().len(), llm.total_parameters());
        assert_eq!(llm.gradients_flat().len(), llm.total_parameters());
    }

    #[test]
    fn degenerate_samples_are_skipped() {
        let mut llm = tiny_model();
        let samples = vec![
            TrainingSample::new("", ""),
            TrainingSample::new("a", "   "),
            TrainingSample::new("a", "b"),
        ];
        let report = llm.train(&samples, &TrainConfig::new(2, OptimizerConfig::sgd(0.1))).unwrap();
        assert_eq!(report.samples_used, 2);
        assert_eq!(report.samples_skipped, 4);
        assert_eq!(report.epoch_losses.len(), 2);
        assert!(llm.loss(&samples[0]).is_none());
    }

    #[test]
    fn hook_can_stop_training_between_samples() {
        let mut llm = tiny_model();
        let samples = vec![TrainingSample::new("a", "b"); 4];
        let mut i_calls = 0;
        let report = llm
            .train_with_hook(&samples, &TrainConfig::new(10, OptimizerConfig::adam(0.01)), |progress| {
                i_calls += 1;
                if progress.sample == 1 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();
        assert_eq!(i_calls, 2);
        assert!(report.stopped_early);
        assert_eq!(report.samples_used, 2);
        assert_eq!(report.epoch_losses.len(), 1);
    }

    #[test]
    fn output_gradient_is_one_hot_minus_probabilities() {
        let mut llm = tiny_model();
        let sample = TrainingSample::new("a", "b");
        let a_probs = llm.next_token_probabilities("a").unwrap();
        llm.accumulate_gradients(&sample).unwrap();

        // Bias gradient of the output layer is the seed itself for one position.
        let v_grads = llm.gradients_flat();
        let a_bias_grad = &v_grads[v_grads.len() - 5..];
        for i in 0..5 {
            let d_expected = if i == 4 { 1.0 - a_probs[i] } else { -a_probs[i] };
            assert!((a_bias_grad[i] - d_expected).abs() < 1e-5);
        }
    }

    #[test]
    fn predict_never_emits_masked_tokens() {
        let mut llm = tiny_model();
        // Force all mass onto [UNK] and [PAD].
        let i_n = llm.total_parameters();
        let mut v_params = llm.parameters_flat();
        v_params[i_n - 5] = 50.0;
        v_params[i_n - 4] = 50.0;
        llm.assign_parameters_flat(&v_params).unwrap();
        let s_out = llm.predict("a", 3).unwrap();
        assert!(!s_out.contains("[UNK]") && !s_out.contains("[PAD]"));
    }

    #[test]
    fn eos_stops_generation_and_is_not_returned() {
        let mut llm = tiny_model();
        let i_n = llm.total_parameters();
        let mut v_params = llm.parameters_flat();
        v_params[i_n - 3] = 50.0;
        llm.assign_parameters_flat(&v_params).unwrap();
        assert_eq!(llm.predict("a b", 5).unwrap(), "");
    }

    #[test]
    fn empty_prompt_uses_bos_when_available() {
        let llm = tiny_model();
        assert_eq!(llm.predict("", 3).unwrap(), "");
        assert!(llm.next_token_probabilities("  ").is_none());

        let vocab = Vocabulary::new(["[PAD]", "[UNK]", "[EOS]", S_BOS, "a", "b"]);
        let llm = Llm::new(vocab, ModelConfig::new(4, 1, 1)).unwrap();
        assert!(llm.next_token_probabilities("").is_some());
        let s_out = llm.predict("", 4).unwrap();
        assert!(!s_out.contains(S_BOS));
    }

    #[test]
    fn sampling_is_reproducible_for_a_seed() {
        let llm = tiny_model();
        let generation = GenerationConfig::sampled(1.5, 9);
        let s_first = llm.predict_with("a", 4, &generation).unwrap();
        let s_second = llm.predict_with("a", 4, &generation).unwrap();
        assert_eq!(s_first, s_second);
        assert!(llm.predict_with("a", 1, &GenerationConfig::sampled(0.0, 1)).is_err());
    }

    #[test]
    fn sample_index_walks_the_cumulative_distribution() {
        let a_p = array![0.0f32, 0.25, 0.0, 0.75];
        assert_eq!(sample_index(&a_p, 0.1), Some(1));
        assert_eq!(sample_index(&a_p, 0.3), Some(3));
        assert_eq!(sample_index(&a_p, 1.0), Some(3));
        assert_eq!(sample_index(&array![0.0f32, 0.0], 0.5), None);
    }
}
