//! Layer normalization: fake-quantized and integer forms.
//!
//! The fused float form cannot be integerized directly; the disassembly
//! pass splits it into a normalization stage, a batch-affine stage and a
//! trailing quantized activation, and the integerization pass collapses
//! that chain into [`IntegerLayerNorm`].

use ndarray::{Array1, ArrayD, Axis};

use crate::error::{QuantError, Result};
use crate::quant::functions::almost_symmetric;

/// Fake-quantized layer normalization with learned affine parameters.
///
/// Tracks the running maximum absolute output, which determines the
/// integer scaler at integerization time.
#[derive(Clone, Debug)]
pub struct QuantLayerNorm {
    /// Learned per-feature scale.
    pub weight: Array1<f32>,
    /// Learned per-feature shift.
    pub bias: Array1<f32>,
    n_levels: usize,
    maxval: f32,
    eps: f32,
}

impl QuantLayerNorm {
    /// Build over `features`-wide vectors.
    pub fn new(n_levels: usize, weight: Array1<f32>, bias: Array1<f32>) -> Self {
        Self {
            weight,
            bias,
            n_levels,
            maxval: 1.0,
            eps: 1e-5,
        }
    }

    /// Level count of the eventual integer output.
    pub fn n_levels(&self) -> usize {
        self.n_levels
    }

    /// Largest absolute output observed so far.
    pub fn maxval(&self) -> f32 {
        self.maxval
    }

    /// Normalize over the last axis, apply the affine, track the range.
    pub fn forward(&mut self, x: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let features = self.weight.len();
        if x.ndim() == 0 || x.shape()[x.ndim() - 1] != features {
            return Err(QuantError::ShapeMismatch {
                op: "layernorm",
                lhs: x.shape().to_vec(),
                rhs: vec![features],
            });
        }
        let axis = Axis(x.ndim() - 1);
        let len = features as f32;
        let mut y = x.clone();
        for mut lane in y.lanes_mut(axis) {
            let mean = lane.sum() / len;
            let var = lane.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / len;
            let denom = (var + self.eps).sqrt();
            for (v, (&w, &b)) in lane
                .iter_mut()
                .zip(self.weight.iter().zip(self.bias.iter()))
            {
                *v = (*v - mean) / denom * w + b;
            }
        }
        let batch_max = y.iter().fold(0.0f32, |a, &v| a.max(v.abs()));
        self.maxval = self.maxval.max(batch_max);
        Ok(y)
    }
}

/// All-integer layer normalization.
///
/// Mean and variance are floored, the affine parameters arrive pre-scaled
/// by the integer scaler, and the final shift by `D` brings the result
/// back into the signed output range.
#[derive(Clone, Debug)]
pub struct IntegerLayerNorm {
    weight: Array1<f32>,
    bias: Array1<f32>,
    d: f32,
    n_levels: i64,
}

impl IntegerLayerNorm {
    /// Default scaling shift.
    pub const DEFAULT_D: f32 = 16_777_216.0; // 2^24

    /// Build from the float module's learned affine and tracked range.
    ///
    /// The affine parameters are snapped onto an almost-symmetric grid
    /// wide enough for both tensors, then folded together with the
    /// output scaler `round(D · (n/2 - 1) / maxval · eps_w)`.
    pub fn from_affine(
        n_levels: usize,
        maxval: f32,
        weight: &Array1<f32>,
        bias: &Array1<f32>,
        d: f32,
    ) -> Result<Self> {
        if maxval <= 0.0 {
            return Err(QuantError::Config {
                param: "maxval",
                reason: format!("{maxval} (the float module never observed data)"),
            });
        }
        let n = n_levels as f32;
        let absmax = weight
            .iter()
            .chain(bias.iter())
            .fold(0.0f32, |a, &v| a.max(v.abs()))
            .max(f32::MIN_POSITIVE);
        let clip_lo = -absmax;
        let clip_hi = almost_symmetric(clip_lo, n_levels);
        let eps_w = (clip_hi - clip_lo) / (n - 1.0);

        let tot_scaler = (d * (n / 2.0 - 1.0) / maxval * eps_w).round();
        let quant = |v: f32| (v.clamp(clip_lo, clip_hi) / eps_w).round() * tot_scaler;

        Ok(Self {
            weight: weight.mapv(quant),
            bias: bias.mapv(quant),
            d,
            n_levels: n_levels as i64,
        })
    }

    /// Integer forward over the last axis.
    pub fn forward(&self, x: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let features = self.weight.len();
        if x.ndim() == 0 || x.shape()[x.ndim() - 1] != features {
            return Err(QuantError::ShapeMismatch {
                op: "integer layernorm",
                lhs: x.shape().to_vec(),
                rhs: vec![features],
            });
        }
        let axis = Axis(x.ndim() - 1);
        let len = features as f32;
        let half = self.n_levels / 2;
        let (clip_lo, clip_hi) = (-(half as f32), (half - 1) as f32);

        let mut y = x.clone();
        for mut lane in y.lanes_mut(axis) {
            let mean = (lane.sum() / len).floor();
            let var = (lane.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / len).floor();
            let denom = (var + 1.0).sqrt().floor();
            for (v, (&w, &b)) in lane
                .iter_mut()
                .zip(self.weight.iter().zip(self.bias.iter()))
            {
                let nom = (*v - mean) * w;
                let t = (nom / denom).floor() + b;
                *v = (t / self.d).floor().clamp(clip_lo, clip_hi);
            }
        }
        Ok(y)
    }
}
