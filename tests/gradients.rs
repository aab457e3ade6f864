use minillm::layer::{FeedForward, Layer, LayerNorm, Trainable};
use minillm::optimizer::Component;
use minillm::{Llm, ModelConfig, TrainingSample, Vocabulary};
use ndarray::Array2;

const EPS: f32 = 1e-3;
const ABS_TOL: f32 = 2e-3;
const REL_TOL: f32 = 5e-2;

fn check_gradient(analytical: &[f32], numerical: &[f32], name: &str) {
    assert_eq!(analytical.len(), numerical.len(), "{name}: gradient length mismatch");
    for (i, (a, n)) in analytical.iter().zip(numerical.iter()).enumerate() {
        let err = (a - n).abs();
        let bound = ABS_TOL + REL_TOL * a.abs().max(n.abs());
        assert!(err <= bound, "{name}[{i}]: analytical={a}, numerical={n}, err={err}");
    }
}

fn vocab() -> Vocabulary {
    Vocabulary::new(["[PAD]", "[UNK]", "[EOS]", "a", "b"])
}

/// Central differences of the sample loss w.r.t. every model parameter.
fn numerical_model_gradient(llm: &mut Llm, sample: &TrainingSample) -> Vec<f32> {
    let params = llm.parameters_flat();
    let mut grads = vec![0.0f32; params.len()];
    for i in 0..params.len() {
        let mut plus = params.clone();
        plus[i] += EPS;
        llm.assign_parameters_flat(&plus).unwrap();
        let f_plus = llm.loss(sample).unwrap();

        let mut minus = params.clone();
        minus[i] -= EPS;
        llm.assign_parameters_flat(&minus).unwrap();
        let f_minus = llm.loss(sample).unwrap();

        grads[i] = (f_plus - f_minus) / (2.0 * EPS);
    }
    llm.assign_parameters_flat(&params).unwrap();
    grads
}

fn check_model(config: ModelConfig, name: &str) {
    let mut llm = Llm::new(vocab(), config).unwrap();
    let sample = TrainingSample::new("a b a", "b a b");

    llm.accumulate_gradients(&sample).unwrap();
    // Accumulators hold the descent direction, flip to dL/dparam.
    let analytical: Vec<f32> = llm.gradients_flat().iter().map(|g| -g).collect();
    let numerical = numerical_model_gradient(&mut llm, &sample);
    check_gradient(&analytical, &numerical, name);
}

#[test]
fn test_single_head_model_gradient() {
    check_model(ModelConfig::new(4, 1, 1).with_hidden_dim(8), "single_head");
}

#[test]
fn test_multi_head_causal_model_gradient() {
    check_model(
        ModelConfig::new(4, 2, 2).with_hidden_dim(8).with_causal_mask(true).with_seed(5),
        "multi_head_causal",
    );
}

#[test]
fn test_excess_target_tokens_are_ignored() {
    let mut llm = Llm::new(vocab(), ModelConfig::new(4, 1, 1)).unwrap();
    let short = TrainingSample::new("a", "b");
    let long = TrainingSample::new("a", "b a a b");
    assert_eq!(llm.loss(&short), llm.loss(&long));

    llm.accumulate_gradients(&short).unwrap();
    let g_short = llm.gradients_flat();
    llm.accumulate_gradients(&long).unwrap();
    assert_eq!(g_short, llm.gradients_flat());
}

#[test]
fn test_small_step_along_descent_direction_lowers_loss() {
    let mut llm = Llm::new(vocab(), ModelConfig::new(4, 1, 2)).unwrap();
    let sample = TrainingSample::new("a b", "b a");
    let before = llm.loss(&sample).unwrap();

    llm.accumulate_gradients(&sample).unwrap();
    let stepped: Vec<f32> = llm
        .parameters_flat()
        .iter()
        .zip(llm.gradients_flat().iter())
        .map(|(p, g)| p + 0.01 * g)
        .collect();
    llm.assign_parameters_flat(&stepped).unwrap();

    assert!(llm.loss(&sample).unwrap() < before);
}

#[test]
fn test_layer_norm_parameter_gradient() {
    let mut norm = LayerNorm::new(3, Component::Standalone(0));
    norm.assign_parameters_flat(&[1.2, -0.4, 0.7, 0.1, 0.0, -0.3]).unwrap();
    let x = Array2::from_shape_vec((2, 3), vec![0.5, -1.0, 2.0, 1.5, 0.3, -0.2]).unwrap();
    let g = Array2::from_shape_vec((2, 3), vec![1.0, 0.5, -2.0, 0.25, -1.0, 0.75]).unwrap();

    let (_, cache) = norm.forward(&x);
    norm.backward(&g, &cache);
    let mut analytical = Vec::new();
    norm.gradients_flat(&mut analytical);

    let mut params = Vec::new();
    norm.parameters_flat(&mut params);
    let mut numerical = vec![0.0f32; params.len()];
    for i in 0..params.len() {
        let mut plus = params.clone();
        plus[i] += EPS;
        norm.assign_parameters_flat(&plus).unwrap();
        let f_plus = (norm.forward(&x).0 * &g).sum();

        let mut minus = params.clone();
        minus[i] -= EPS;
        norm.assign_parameters_flat(&minus).unwrap();
        let f_minus = (norm.forward(&x).0 * &g).sum();

        numerical[i] = (f_plus - f_minus) / (2.0 * EPS);
    }
    check_gradient(&analytical, &numerical, "layer_norm_params");
}

#[test]
fn test_feed_forward_weight_gradient() {
    let w1 = Array2::from_shape_vec((2, 3), vec![0.5, -0.3, 0.8, 0.2, 0.9, -0.6]).unwrap();
    let w2 = Array2::from_shape_vec((3, 2), vec![0.4, -0.7, 0.1, 0.3, -0.5, 0.6]).unwrap();
    let mut ff = FeedForward::from_weights(w1, w2, 2, 3, Component::Standalone(1)).unwrap();
    let x = Array2::from_shape_vec((2, 2), vec![1.0, 0.5, -0.8, 1.2]).unwrap();
    let g = Array2::from_shape_vec((2, 2), vec![0.3, -1.0, 1.5, 0.2]).unwrap();

    let (_, cache) = ff.forward(&x);
    ff.backward(&g, &cache);
    let mut analytical = Vec::new();
    ff.gradients_flat(&mut analytical);

    let mut params = Vec::new();
    ff.parameters_flat(&mut params);
    let mut numerical = vec![0.0f32; params.len()];
    for i in 0..params.len() {
        let mut plus = params.clone();
        plus[i] += EPS;
        ff.assign_parameters_flat(&plus).unwrap();
        let f_plus = (ff.forward(&x).0 * &g).sum();

        let mut minus = params.clone();
        minus[i] -= EPS;
        ff.assign_parameters_flat(&minus).unwrap();
        let f_minus = (ff.forward(&x).0 * &g).sum();

        numerical[i] = (f_plus - f_minus) / (2.0 * EPS);
    }
    check_gradient(&analytical, &numerical, "feed_forward_weights");
}
