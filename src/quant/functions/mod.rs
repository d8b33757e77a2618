//! Differentiable quantization primitives.
//!
//! - Grid quantization with a straight-through estimator and learnable
//!   clip-bound gradients (PACT)
//! - Log-threshold quantization with normalized gradients (TQT)
//! - Almost-symmetric bound derivation for two's-complement ranges

mod quantize;
mod symmetric;
mod tqt;


pub use quantize::{quantize, quantize_backward, quantize_noisy, QuantizeGrad, RoundingMode};
pub use symmetric::{almost_symmetric, almost_symmetric_backward};
pub use tqt::{tqt_backward, tqt_bounds, tqt_quantize, TqtGrad, TqtState};
