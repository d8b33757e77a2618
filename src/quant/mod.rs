//! Quantization math core.
//!
//! - differentiable quantization functions (PACT / TQT)
//! - activation quantizers with the collect-then-start lifecycle
//! - quantized linear operators
//! - fused composite operators with epsilon reconciliation
//! - integer requantization and its fusion
//! - layer normalization in fake-quantized and integer forms

pub mod activation;
pub mod composite;
pub mod functions;
pub mod linop;
pub mod norm;
pub mod requant;
pub mod stats;

pub use activation::{ActConfig, ActKind, ClipInit, QuantAct};
pub use composite::{QuantAdd, QuantConcat, QuantMatmul, SignednessPolicy};
pub use functions::{almost_symmetric, quantize, quantize_backward, RoundingMode};
pub use linop::{Granularity, LinOpKind, QuantLinearOp, WeightQuantConfig};
pub use norm::{IntegerLayerNorm, QuantLayerNorm};
pub use requant::{try_merge, Convention, RequantShift};
pub use stats::RunningStats;
