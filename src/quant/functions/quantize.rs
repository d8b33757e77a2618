//! Grid quantization with a straight-through backward pass.

use ndarray::ArrayD;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{QuantError, Result};

/// How real values are snapped to the quantization grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RoundingMode {
    /// Truncate toward negative infinity. Matches shift-based hardware.
    #[default]
    Floor,
    /// Round to the nearest grid point. Still integerizable.
    Round,
}

/// Quantize `x` onto the grid `{lo, lo+eps, ..., hi}`.
///
/// Forward: `y = clip(round_or_floor((x - lo)/eps), 0, (hi-lo)/eps) * eps + lo`.
///
/// A non-positive `eps` fails with [`QuantError::NonPositiveEps`]; a range
/// with `hi <= lo` degenerates to the single level `lo`.
pub fn quantize(
    x: &ArrayD<f32>,
    eps: f32,
    clip_lo: f32,
    clip_hi: f32,
    rounding: RoundingMode,
) -> Result<ArrayD<f32>> {
    if eps <= 0.0 || !eps.is_finite() {
        return Err(QuantError::NonPositiveEps { eps });
    }
    if clip_hi <= clip_lo {
        return Ok(ArrayD::from_elem(x.raw_dim(), clip_lo));
    }

    // the last whole step, so the clipped top value stays on the grid
    // even when the range is not an exact multiple of eps
    let n_steps = ((clip_hi - clip_lo) / eps).floor();
    Ok(x.mapv(|v| {
        let k = (v - clip_lo) / eps;
        let k = match rounding {
            RoundingMode::Floor => k.floor(),
            RoundingMode::Round => k.round(),
        };
        k.clamp(0.0, n_steps) * eps + clip_lo
    }))
}

/// Quantize with additive uniform noise in `[-eps/2, eps/2]`.
///
/// The noise regularizes training against quantization error; it is added
/// to the forward output only and never appears in the gradient path.
pub fn quantize_noisy<R: Rng>(
    x: &ArrayD<f32>,
    eps: f32,
    clip_lo: f32,
    clip_hi: f32,
    rounding: RoundingMode,
    rng: &mut R,
) -> Result<ArrayD<f32>> {
    let mut y = quantize(x, eps, clip_lo, clip_hi, rounding)?;
    let half = eps / 2.0;
    y.mapv_inplace(|v| v + rng.gen_range(-half..half));
    Ok(y)
}

/// Gradients of [`quantize`] with respect to its input and clip bounds.
#[derive(Clone, Debug)]
pub struct QuantizeGrad {
    /// Gradient w.r.t. the input tensor.
    pub dx: ArrayD<f32>,
    /// Gradient w.r.t. the lower clip bound (sum over clipped-low elements).
    pub dclip_lo: f32,
    /// Gradient w.r.t. the upper clip bound (sum over clipped-high elements).
    pub dclip_hi: f32,
}

/// Straight-through backward pass for [`quantize`].
///
/// Inside `[lo, hi]` the function acts as the identity on gradients.
/// Outside, `dx` is zeroed when `clip_gradient` is set and passed through
/// unchanged otherwise. The clip bounds collect the gradient mass of the
/// elements they clipped, which is what makes the bounds learnable.
pub fn quantize_backward(
    grad: &ArrayD<f32>,
    x: &ArrayD<f32>,
    clip_lo: f32,
    clip_hi: f32,
    clip_gradient: bool,
) -> QuantizeGrad {
    let mut dclip_lo = 0.0;
    let mut dclip_hi = 0.0;
    let mut dx = grad.clone();
    for (&xv, gv) in x.iter().zip(dx.iter_mut()) {
        if xv < clip_lo {
            dclip_lo += *gv;
            if clip_gradient {
                *gv = 0.0;
            }
        } else if xv > clip_hi {
            dclip_hi += *gv;
            if clip_gradient {
                *gv = 0.0;
            }
        }
    }
    QuantizeGrad {
        dx,
        dclip_lo,
        dclip_hi,
    }
}
