//! Signed-vs-unsigned placement policy for epsilon reconciliation.

use serde::{Deserialize, Serialize};

use crate::quant::activation::QuantAct;

/// Decides whether a reconciled input keeps unsigned placement.
///
/// The reference heuristic treats an input as unsigned when its lower
/// bound is within one quantization step of zero; its author flagged the
/// threshold as uncertain, so the alternative half-range rule is kept
/// selectable instead of hard-coding either.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SignednessPolicy {
    /// Unsigned when `|clip_lo| < eps` (barely signed).
    #[default]
    EpsThreshold,
    /// Unsigned when `|clip_lo| < |clip_hi| / 2`.
    HalfRangeThreshold,
}

impl SignednessPolicy {
    /// Whether `act` should be given unsigned placement.
    pub fn is_unsigned(&self, act: &QuantAct) -> bool {
        let (lo, hi) = act.clip_bounds();
        match self {
            Self::EpsThreshold => lo.abs() < act.eps(),
            Self::HalfRangeThreshold => lo.abs() < hi.abs() / 2.0,
        }
    }
}
