//! Almost-symmetric clip bound derivation.
//!
//! Two's-complement integer ranges are asymmetric by one level
//! (e.g. `[-128, 127]`), so a symmetric real range cannot map onto them
//! exactly. The almost-symmetric bound sacrifices one step on the positive
//! side to keep zero on the grid.

/// Derive the upper clip bound from the lower one for an `n_levels` grid.
///
/// Returns `hi = -lo * (n_levels - 2) / n_levels`, the largest grid-aligned
/// value such that the resulting range maps onto `[-n/2, n/2-1]` integer
/// levels with zero exactly representable. The result is already
/// grid-aligned, so re-deriving from the same `lo` is a fixed point.
pub fn almost_symmetric(clip_lo: f32, n_levels: usize) -> f32 {
    let n = n_levels as f32;
    -clip_lo * (n - 2.0) / n
}

/// Gradient of [`almost_symmetric`] w.r.t. `clip_lo`.
///
/// The derivation is linear, so the upper bound's gradient flows back to
/// the single learnable lower bound scaled by the constant factor.
pub fn almost_symmetric_backward(grad_hi: f32, n_levels: usize) -> f32 {
    let n = n_levels as f32;
    -grad_hi * (n - 2.0) / n
}
