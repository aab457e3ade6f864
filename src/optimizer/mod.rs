// optimizer/mod.rs
// Description: Stateful update rules shared by every trainable tensor of a model.
//              State is keyed by a structured ParamKey so each tensor (and each
//              attention head, each embedding row) keeps independent moments.
// History:
// - 2026-10-19: Move Adam out of the layers into a keyed optimizer; add SGD.
//
// Sign convention: gradients handed to an optimizer point downhill (they are the
// negative loss gradient) and every rule adds `lr * update` to the parameter.

mod adam;
mod sgd;

use std::fmt;

use ndarray::{ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2};

pub use adam::Adam;
pub use sgd::Sgd;

/// Which block sub-layer a parameter belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockPart {
    Attention,
    FeedForward,
    Norm1,
    Norm2,
}

/// Owner of a parameter tensor inside the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Component {
    Embedding,
    Block { layer: usize, part: BlockPart },
    Output,
    /// Free standing tensors (tests, external callers).
    Standalone(u32),
}

/// Role of a tensor inside its component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamRole {
    Query,
    Key,
    Value,
    AttnOut,
    Hidden,
    Projection,
    Gamma,
    Beta,
    Weights,
    Bias,
    Row,
}

impl ParamRole {
    fn short_name(self) -> &'static str {
        match self {
            ParamRole::Query => "wq",
            ParamRole::Key => "wk",
            ParamRole::Value => "wv",
            ParamRole::AttnOut => "wo",
            ParamRole::Hidden => "w1",
            ParamRole::Projection => "w2",
            ParamRole::Gamma => "gamma",
            ParamRole::Beta => "beta",
            ParamRole::Weights => "weights",
            ParamRole::Bias => "bias",
            ParamRole::Row => "row",
        }
    }
}

/// Stable identifier of one parameter tensor. `index` carries the head number for
/// per-head attention weights and the token id for embedding rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ParamKey {
    pub component: Component,
    pub role: ParamRole,
    pub index: Option<usize>,
}

impl ParamKey {
    pub fn new(component: Component, role: ParamRole) -> Self {
        Self {
            component,
            role,
            index: None,
        }
    }

    pub fn indexed(component: Component, role: ParamRole, i_index: usize) -> Self {
        Self {
            component,
            role,
            index: Some(i_index),
        }
    }

    pub fn standalone(i_id: u32) -> Self {
        Self::new(Component::Standalone(i_id), ParamRole::Weights)
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.component {
            Component::Embedding => write!(f, "embedding")?,
            Component::Output => write!(f, "output")?,
            Component::Standalone(i_id) => write!(f, "param{i_id}")?,
            Component::Block { layer, part } => {
                write!(f, "transformer_{layer}")?;
                match part {
                    BlockPart::Attention | BlockPart::FeedForward => {}
                    BlockPart::Norm1 => write!(f, "_norm1")?,
                    BlockPart::Norm2 => write!(f, "_norm2")?,
                }
            }
        }
        write!(f, "_{}", self.role.short_name())?;
        match (self.index, self.role) {
            (Some(i), ParamRole::Row) => write!(f, "{i}"),
            (Some(i), _) => write!(f, "_head{i}"),
            (None, _) => Ok(()),
        }
    }
}

/// Update rule over keyed parameter tensors.
pub trait Optimizer {
    fn name(&self) -> &str;

    /// Applies one step to a matrix parameter. Shape mismatches are ignored.
    fn update(&mut self, key: ParamKey, a_param: ArrayViewMut2<f32>, a_grad: ArrayView2<f32>);

    /// Applies one step to a vector parameter (LayerNorm gamma / beta, biases, embedding rows).
    fn update_1d(&mut self, key: ParamKey, a_param: ArrayViewMut1<f32>, a_grad: ArrayView1<f32>);

    fn learning_rate(&self) -> f32;

    fn set_learning_rate(&mut self, d_lr: f32);

    /// Clears all per-key state.
    fn reset(&mut self);
}
