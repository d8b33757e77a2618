//! Normalization and affine stages.

use ndarray::{Array1, ArrayD, Axis};

use crate::error::{QuantError, Result};

/// Inference-mode batch normalization over channel axis 1.
#[derive(Clone, Debug)]
pub struct BatchNorm {
    /// Learned per-channel scale.
    pub weight: Array1<f32>,
    /// Learned per-channel shift.
    pub bias: Array1<f32>,
    /// Running mean.
    pub running_mean: Array1<f32>,
    /// Running variance.
    pub running_var: Array1<f32>,
    /// Numerical stabilizer.
    pub eps: f32,
}

impl BatchNorm {
    /// Build from frozen statistics and affine parameters.
    pub fn new(
        weight: Array1<f32>,
        bias: Array1<f32>,
        running_mean: Array1<f32>,
        running_var: Array1<f32>,
    ) -> Self {
        Self {
            weight,
            bias,
            running_mean,
            running_var,
            eps: 1e-5,
        }
    }

    /// Normalize and scale per channel.
    pub fn forward(&self, x: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let channels = self.weight.len();
        if x.ndim() < 2 || x.shape()[1] != channels {
            return Err(QuantError::ShapeMismatch {
                op: "batchnorm",
                lhs: x.shape().to_vec(),
                rhs: vec![channels],
            });
        }
        let mut y = x.clone();
        for (c, mut lane) in y.axis_iter_mut(Axis(1)).enumerate() {
            let scale = self.weight[c] / (self.running_var[c] + self.eps).sqrt();
            let shift = self.bias[c] - self.running_mean[c] * scale;
            lane.mapv_inplace(|v| v * scale + shift);
        }
        Ok(y)
    }
}

/// Pure normalization over the last axis (no affine).
///
/// This is the floating-point stage layer-norm disassembly leaves behind;
/// the learned scale/bias move into a trailing [`Affine`].
#[derive(Clone, Copy, Debug)]
pub struct Normalize {
    /// Numerical stabilizer added to the variance.
    pub eps: f32,
}

impl Default for Normalize {
    fn default() -> Self {
        Self { eps: 1e-5 }
    }
}

impl Normalize {
    /// Build with the default stabilizer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize each vector along the last axis to zero mean, unit variance.
    pub fn forward(&self, x: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        if x.ndim() == 0 {
            return Err(QuantError::ShapeMismatch {
                op: "normalize",
                lhs: x.shape().to_vec(),
                rhs: vec![],
            });
        }
        let axis = Axis(x.ndim() - 1);
        let last = x.shape()[x.ndim() - 1] as f32;
        let mut y = x.clone();
        for mut lane in y.lanes_mut(axis) {
            let mean = lane.sum() / last;
            let var = lane.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / last;
            let denom = (var + self.eps).sqrt();
            lane.mapv_inplace(|v| (v - mean) / denom);
        }
        Ok(y)
    }
}

/// Element-wise affine over the last axis: `y = weight ⊙ x + bias`.
#[derive(Clone, Debug)]
pub struct Affine {
    /// Per-feature scale.
    pub weight: Array1<f32>,
    /// Per-feature shift.
    pub bias: Array1<f32>,
}

impl Affine {
    /// Build from scale and shift vectors.
    pub fn new(weight: Array1<f32>, bias: Array1<f32>) -> Self {
        Self { weight, bias }
    }

    /// Apply the affine transform along the last axis.
    pub fn forward(&self, x: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let features = self.weight.len();
        if x.ndim() == 0 || x.shape()[x.ndim() - 1] != features {
            return Err(QuantError::ShapeMismatch {
                op: "affine",
                lhs: x.shape().to_vec(),
                rhs: vec![features],
            });
        }
        let axis = Axis(x.ndim() - 1);
        let mut y = x.clone();
        for mut lane in y.lanes_mut(axis) {
            for (v, (&w, &b)) in lane
                .iter_mut()
                .zip(self.weight.iter().zip(self.bias.iter()))
            {
                *v = *v * w + b;
            }
        }
        Ok(y)
    }
}
