//! Trained quantization thresholds (TQT).
//!
//! TQT learns a single log-scale parameter `log_t` per tensor instead of
//! explicit clip bounds: `clip_hi = 2^log_t`, `clip_lo = -clip_hi`. The
//! gradient on `log_t` is notoriously noisy, so it is normalized by a
//! bias-corrected running estimate of its variance before being applied.

use ndarray::ArrayD;

use crate::error::Result;

use super::quantize::{quantize, RoundingMode};

/// Clip bounds implied by a log-threshold.
pub fn tqt_bounds(log_t: f32) -> (f32, f32) {
    let t = log_t.exp2();
    (-t, t)
}

/// Quantize `x` with bounds derived from `log_t` on an `n_levels` grid.
pub fn tqt_quantize(
    x: &ArrayD<f32>,
    log_t: f32,
    n_levels: usize,
    rounding: RoundingMode,
) -> Result<ArrayD<f32>> {
    let (lo, hi) = tqt_bounds(log_t);
    let eps = (hi - lo) / (n_levels as f32 - 1.0);
    quantize(x, eps, lo, hi, rounding)
}

/// Running state for TQT gradient normalization.
///
/// Tracks an exponential moving average of the squared `log_t` gradient
/// (momentum `beta`) together with the accumulated bias-correction factor,
/// mirroring the running-beta / running-variance buffer pair of the
/// reference algorithm.
#[derive(Clone, Debug)]
pub struct TqtState {
    beta: f32,
    running_beta: f32,
    running_grad_var: f32,
}

impl TqtState {
    /// Create fresh normalization state with the given momentum.
    pub fn new(beta: f32) -> Self {
        Self {
            beta,
            running_beta: 1.0,
            running_grad_var: 0.0,
        }
    }

    /// Normalize a raw `log_t` gradient and update the running estimate.
    ///
    /// When `clip_grad` is set the normalized gradient is additionally
    /// squashed through `tanh` to bound single-step updates.
    pub fn normalize(&mut self, grad: f32, clip_grad: bool) -> f32 {
        self.running_grad_var =
            self.beta * self.running_grad_var + (1.0 - self.beta) * grad * grad;
        self.running_beta *= self.beta;
        let corrected = self.running_grad_var / (1.0 - self.running_beta);
        let g = grad / (corrected.sqrt() + 1e-5);
        if clip_grad {
            g.tanh()
        } else {
            g
        }
    }
}

/// Gradients of [`tqt_quantize`].
#[derive(Clone, Debug)]
pub struct TqtGrad {
    /// Gradient w.r.t. the input (clipped straight-through).
    pub dx: ArrayD<f32>,
    /// Normalized gradient w.r.t. `log_t`.
    pub dlog_t: f32,
}

/// Backward pass for [`tqt_quantize`].
///
/// Inside the clip range the input gradient passes through and the
/// threshold sees the quantization residual `(y - x)·ln2`; outside, the
/// input gradient is zeroed and the threshold sees the saturated bound.
pub fn tqt_backward(
    grad: &ArrayD<f32>,
    x: &ArrayD<f32>,
    y: &ArrayD<f32>,
    log_t: f32,
    state: &mut TqtState,
    clip_grad: bool,
) -> TqtGrad {
    let (lo, hi) = tqt_bounds(log_t);
    let ln2 = std::f32::consts::LN_2;

    let mut dlog_t = 0.0;
    let mut dx = grad.clone();
    for ((&xv, &yv), gv) in x.iter().zip(y.iter()).zip(dx.iter_mut()) {
        if xv < lo {
            dlog_t += *gv * lo * ln2;
            *gv = 0.0;
        } else if xv > hi {
            dlog_t += *gv * hi * ln2;
            *gv = 0.0;
        } else {
            dlog_t += *gv * (yv - xv) * ln2;
        }
    }

    TqtGrad {
        dx,
        dlog_t: state.normalize(dlog_t, clip_grad),
    }
}
