//! Integer requantization via multiply-add-shift.

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::error::{QuantError, Result};

/// Hardware rounding convention for requantization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Convention {
    /// Addition folded before the multiply, one terminal round:
    /// `y = round((x + round(add/mul)) * mul / div)`.
    AccumulateFirst,
    /// Multiply-add first, floor division:
    /// `y = floor((x*mul + add) / div)`.
    ScaleFirst,
}

/// Requantization operator: converts an accumulator at a fine epsilon into
/// an output at a coarser epsilon using only integer multiply/add/shift.
///
/// The output clip is the last operation applied; unsigned outputs clip to
/// `[0, n_levels-1]`, signed outputs to `[-ceil(n/2), ceil(n/2)-1]`
/// (asymmetric by one level, matching two's-complement ranges).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequantShift {
    mul: i64,
    add: i64,
    div: i64,
    signed: bool,
    n_levels_out: i64,
    convention: Convention,
}

impl RequantShift {
    /// Build a requantization operator. `mul` and `div` must be strictly
    /// positive (the operator must be monotone in its input).
    pub fn new(
        mul: i64,
        add: i64,
        div: i64,
        signed: bool,
        n_levels_out: i64,
        convention: Convention,
    ) -> Result<Self> {
        if div <= 0 {
            return Err(QuantError::Config {
                param: "div",
                reason: format!("{div} (must be positive)"),
            });
        }
        if mul <= 0 {
            return Err(QuantError::Config {
                param: "mul",
                reason: format!("{mul} (must be positive)"),
            });
        }
        if n_levels_out < 2 {
            return Err(QuantError::Config {
                param: "n_levels_out",
                reason: format!("{n_levels_out} (need at least 2 levels)"),
            });
        }
        Ok(Self {
            mul,
            add,
            div,
            signed,
            n_levels_out,
            convention,
        })
    }

    /// Multiplicative factor.
    pub fn mul(&self) -> i64 {
        self.mul
    }

    /// Additive term.
    pub fn add(&self) -> i64 {
        self.add
    }

    /// Divisor.
    pub fn div(&self) -> i64 {
        self.div
    }

    /// Whether the output is signed.
    pub fn signed(&self) -> bool {
        self.signed
    }

    /// Output level count.
    pub fn n_levels_out(&self) -> i64 {
        self.n_levels_out
    }

    /// Rounding convention.
    pub fn convention(&self) -> Convention {
        self.convention
    }

    /// Output clip interval.
    pub fn clip_bounds(&self) -> (i64, i64) {
        if self.signed {
            // ceil(n/2) for even and odd level counts alike
            let c = (self.n_levels_out + 1) / 2;
            (-c, c - 1)
        } else {
            (0, self.n_levels_out - 1)
        }
    }

    /// Requantize a single integer value.
    pub fn apply(&self, x: i64) -> i64 {
        let y = match self.convention {
            Convention::ScaleFirst => div_floor(
                i128::from(x) * i128::from(self.mul) + i128::from(self.add),
                i128::from(self.div),
            ),
            Convention::AccumulateFirst => {
                let folded = div_round(i128::from(self.add), i128::from(self.mul));
                div_round(
                    (i128::from(x) + folded) * i128::from(self.mul),
                    i128::from(self.div),
                )
            }
        };
        let (lo, hi) = self.clip_bounds();
        (y as i64).clamp(lo, hi)
    }

    /// Requantize an integer-valued tensor held in floats.
    pub fn forward(&self, x: &ArrayD<f32>) -> ArrayD<f32> {
        x.mapv(|v| self.apply(v.round() as i64) as f32)
    }
}

/// Floor division (toward negative infinity) for a positive divisor.
fn div_floor(a: i128, b: i128) -> i128 {
    a.div_euclid(b)
}

/// Round-half-away-from-zero division for a positive divisor.
fn div_round(a: i128, b: i128) -> i128 {
    if a >= 0 {
        (2 * a + b) / (2 * b)
    } else {
        (2 * a - b) / (2 * b)
    }
}
