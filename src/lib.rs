//! # cuantizar
//!
//! Fake-quantization training and graph-level integerization for
//! fixed-point embedded accelerators.
//!
//! The crate has two tightly coupled cores:
//!
//! - a **quantization math core**: the PACT/TQT differentiable
//!   quantizer, learnable clip ranges with a collect-then-start
//!   lifecycle, per-layer epsilon propagation, and integer
//!   requantization ([`quant`]);
//! - a **graph transformation engine**: operation-tree discovery over a
//!   traced computation graph, fused-module replacement, and the
//!   integerization pipeline that converts a fake-quantized floating
//!   model into one computing with integer arithmetic only ([`graph`],
//!   [`passes`]).
//!
//! # Example
//!
//! ```ignore
//! use cuantizar::prelude::*;
//!
//! let mut graph = Graph::new();
//! // ... build or trace a float graph, harmonize, collect stats ...
//! let pipeline = Pipeline::new(vec![
//!     Box::new(AnnotatePass::new(shapes, input_eps)),
//!     Box::new(LayerNormDisassemblePass),
//!     Box::new(IntegerizePass::new(Convention::ScaleFirst)),
//!     Box::new(RequantMergePass),
//! ])?;
//! pipeline.run(&mut graph, &mut MetaTable::new())?;
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod graph;
pub mod nn;
pub mod passes;
pub mod quant;

pub use error::{QuantError, Result};
pub use graph::{Graph, GraphModule, MetaTable};
pub use quant::{QuantAct, QuantAdd, QuantLinearOp, RequantShift};

/// Commonly used types, re-exported in one place.
pub mod prelude {
    pub use crate::error::{QuantError, Result};
    pub use crate::graph::{
        Graph, GraphModule, MetaKey, MetaTable, ModuleKind, NodeOp, OpKind, OpTarget, Wrapped,
    };
    pub use crate::nn::{Affine, BatchNorm, Conv1d, Conv2d, Linear, Normalize};
    pub use crate::passes::{
        discover_trees, AddTreeReplacePass, AnnotatePass, ConcatTreeReplacePass, GraphPass,
        HarmonizePass, InsertActivationsBetweenLinearsPass, IntegerizePass,
        LayerNormDisassemblePass, MulTreeReplacePass, OpTree, Pipeline, RequantMergePass,
        TreeReplacePass, TreeSpec,
    };
    pub use crate::quant::{
        ActConfig, ActKind, ClipInit, Convention, Granularity, QuantAct, QuantAdd, QuantConcat,
        QuantLayerNorm, QuantLinearOp, QuantMatmul, RequantShift, RoundingMode, SignednessPolicy,
        WeightQuantConfig,
    };
}
