//! Folding cascaded requantization operators.

use super::shift::{Convention, RequantShift};

/// Try to fold two cascaded requantization operators into one.
///
/// Returns `Some(merged)` only when applying the merged operator is
/// bit-exact equivalent to applying `first` then `second` for every
/// integer input. Declining is not an error: incompatible pairs are
/// simply left in place by the merge pass.
///
/// Fusion requires:
/// - matching conventions and signedness,
/// - an algebraically exact composition:
///   - `first.div == 1` (the first stage loses no information), or
///   - `ScaleFirst` with `second.mul == 1 && second.add == 0` (nested
///     floors over a pure divide collapse exactly),
/// - the first stage's clip must commute with the fusion: its saturation
///   points, pushed through the second stage, must land at or beyond the
///   second stage's own clip bounds.
pub fn try_merge(first: &RequantShift, second: &RequantShift) -> Option<RequantShift> {
    if first.convention() != second.convention() || first.signed() != second.signed() {
        return None;
    }

    let merged = match first.convention() {
        Convention::ScaleFirst => {
            if first.div() == 1 {
                // floor((x*m1 + a1)*m2 + a2) / d2 with the inner stage exact
                RequantShift::new(
                    first.mul().checked_mul(second.mul())?,
                    first.add().checked_mul(second.mul())?.checked_add(second.add())?,
                    second.div(),
                    second.signed(),
                    second.n_levels_out(),
                    Convention::ScaleFirst,
                )
                .ok()?
            } else if second.mul() == 1 && second.add() == 0 {
                // floor(floor(v)/n) == floor(v/n) for positive integer n
                RequantShift::new(
                    first.mul(),
                    first.add(),
                    first.div().checked_mul(second.div())?,
                    second.signed(),
                    second.n_levels_out(),
                    Convention::ScaleFirst,
                )
                .ok()?
            } else {
                return None;
            }
        }
        Convention::AccumulateFirst => {
            // Rounding does not nest exactly, so only the divisor-free
            // first stage composes; the folded add must reproduce the
            // first stage's rounded offset exactly.
            if first.div() == 1 && second.add() == 0 {
                let m1 = first.mul();
                let m2 = second.mul();
                let r1 = div_round_i64(first.add(), m1);
                let mul = m1.checked_mul(m2)?;
                RequantShift::new(
                    mul,
                    r1.checked_mul(mul)?,
                    second.div(),
                    second.signed(),
                    second.n_levels_out(),
                    Convention::AccumulateFirst,
                )
                .ok()?
            } else {
                return None;
            }
        }
    };

    // Saturation check: pushing the first stage's clip bounds through the
    // second stage must already saturate it, otherwise the intermediate
    // clip would be observable and the fusion would not be bit-exact.
    let (lo1, hi1) = first.clip_bounds();
    let (lo2, hi2) = second.clip_bounds();
    if second.apply(hi1) < hi2 || second.apply(lo1) > lo2 {
        return None;
    }

    Some(merged)
}

fn div_round_i64(a: i64, b: i64) -> i64 {
    if a >= 0 {
        (2 * a + b) / (2 * b)
    } else {
        (2 * a - b) / (2 * b)
    }
}
