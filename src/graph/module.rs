//! Modules a graph can call by name.

use ndarray::ArrayD;

use crate::error::{QuantError, Result};
use crate::nn::{Affine, BatchNorm, Conv1d, Conv2d, Linear, Normalize};
use crate::quant::activation::{ActConfig, QuantAct};
use crate::quant::composite::{QuantAdd, QuantConcat, QuantMatmul};
use crate::quant::linop::{LinOpKind, QuantLinearOp};
use crate::quant::norm::{IntegerLayerNorm, QuantLayerNorm};
use crate::quant::requant::RequantShift;

use super::ir::Graph;

/// Payload-free classification of a module, used by adjacency matching.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModuleKind {
    /// Fully connected layer (plain or weight-quantized).
    Linear,
    /// 1-D convolution (plain or weight-quantized).
    Conv1d,
    /// 2-D convolution (plain or weight-quantized).
    Conv2d,
    /// Batch normalization.
    BatchNorm,
    /// Activation quantizer.
    Act,
    /// Fused quantized addition.
    Add,
    /// Fused quantized concatenation.
    Concat,
    /// Quantization-aware matmul.
    Matmul,
    /// Requantization operator.
    Requant,
    /// Fused layer normalization.
    LayerNorm,
    /// Integer layer normalization.
    IntLayerNorm,
    /// Pure normalization stage.
    Normalize,
    /// Affine stage.
    Affine,
    /// Opaque wrapped subgraph.
    Wrapped,
}

/// An opaque wrapped subgraph (attention blocks and the like).
///
/// The inner graph is hidden from outer pattern matching; passes recurse
/// into it through the wrapped-module combinator. A statistics tracker
/// observes the wrapped output so the integerization step knows its
/// range.
#[derive(Clone, Debug)]
pub struct Wrapped {
    /// The encapsulated graph.
    pub graph: Graph,
    /// Identity activation tracking output statistics.
    pub tracker: QuantAct,
}

impl Wrapped {
    /// Wrap a graph, tracking output statistics at `n_levels`.
    pub fn new(graph: Graph, n_levels: usize) -> Result<Self> {
        Ok(Self {
            graph,
            tracker: QuantAct::new(ActConfig::signed(n_levels))?,
        })
    }
}

/// Every module kind the graph can reference.
#[derive(Clone, Debug)]
pub enum GraphModule {
    /// Plain fully connected layer.
    Linear(Linear),
    /// Plain 1-D convolution.
    Conv1d(Conv1d),
    /// Plain 2-D convolution.
    Conv2d(Conv2d),
    /// Batch normalization.
    BatchNorm(BatchNorm),
    /// Activation quantizer.
    Act(QuantAct),
    /// Weight-quantized linear operator.
    LinOp(QuantLinearOp),
    /// Fused quantized addition.
    Add(QuantAdd),
    /// Fused quantized concatenation.
    Concat(QuantConcat),
    /// Quantization-aware matmul.
    Matmul(QuantMatmul),
    /// Requantization operator.
    Requant(RequantShift),
    /// Fused layer normalization.
    LayerNorm(QuantLayerNorm),
    /// Integer layer normalization.
    IntLayerNorm(IntegerLayerNorm),
    /// Pure normalization stage.
    Normalize(Normalize),
    /// Affine stage.
    Affine(Affine),
    /// Opaque wrapped subgraph.
    Wrapped(Wrapped),
}

impl GraphModule {
    /// Classify the module; weight-quantized operators report the kind of
    /// the operator they wrap.
    pub fn kind(&self) -> ModuleKind {
        match self {
            Self::Linear(_) => ModuleKind::Linear,
            Self::Conv1d(_) => ModuleKind::Conv1d,
            Self::Conv2d(_) => ModuleKind::Conv2d,
            Self::BatchNorm(_) => ModuleKind::BatchNorm,
            Self::Act(_) => ModuleKind::Act,
            Self::LinOp(op) => match op.kind() {
                LinOpKind::Linear(_) => ModuleKind::Linear,
                LinOpKind::Conv1d(_) => ModuleKind::Conv1d,
                LinOpKind::Conv2d(_) => ModuleKind::Conv2d,
            },
            Self::Add(_) => ModuleKind::Add,
            Self::Concat(_) => ModuleKind::Concat,
            Self::Matmul(_) => ModuleKind::Matmul,
            Self::Requant(_) => ModuleKind::Requant,
            Self::LayerNorm(_) => ModuleKind::LayerNorm,
            Self::IntLayerNorm(_) => ModuleKind::IntLayerNorm,
            Self::Normalize(_) => ModuleKind::Normalize,
            Self::Affine(_) => ModuleKind::Affine,
            Self::Wrapped(_) => ModuleKind::Wrapped,
        }
    }

    /// Dispatch a forward pass to the module.
    pub fn forward(&mut self, inputs: &[ArrayD<f32>]) -> Result<ArrayD<f32>> {
        let one = |inputs: &[ArrayD<f32>]| -> Result<ArrayD<f32>> {
            inputs
                .first()
                .cloned()
                .ok_or(QuantError::InputArity { expected: 1, got: 0 })
        };
        match self {
            Self::Linear(m) => m.forward(&one(inputs)?),
            Self::Conv1d(m) => m.forward(&one(inputs)?),
            Self::Conv2d(m) => m.forward(&one(inputs)?),
            Self::BatchNorm(m) => m.forward(&one(inputs)?),
            Self::Act(m) => m.forward(&one(inputs)?),
            Self::LinOp(m) => m.forward(&one(inputs)?),
            Self::Add(m) => m.forward(inputs),
            Self::Concat(m) => m.forward(inputs),
            Self::Matmul(m) => {
                if inputs.len() != 2 {
                    return Err(QuantError::InputArity {
                        expected: 2,
                        got: inputs.len(),
                    });
                }
                m.forward(&inputs[0], &inputs[1])
            }
            Self::Requant(m) => Ok(m.forward(&one(inputs)?)),
            Self::LayerNorm(m) => m.forward(&one(inputs)?),
            Self::IntLayerNorm(m) => m.forward(&one(inputs)?),
            Self::Normalize(m) => m.forward(&one(inputs)?),
            Self::Affine(m) => m.forward(&one(inputs)?),
            Self::Wrapped(m) => {
                let y = m.graph.forward(inputs)?;
                m.tracker.forward(&y)
            }
        }
    }
}
