//! Fully connected layer.

use ndarray::{Array1, Array2, ArrayD, Ix2};

use crate::error::{QuantError, Result};

/// A fully connected layer `y = x Wᵀ + b`.
#[derive(Clone, Debug)]
pub struct Linear {
    /// Weight matrix, shape `[out_features, in_features]`.
    pub weight: Array2<f32>,
    /// Optional bias, length `out_features`.
    pub bias: Option<Array1<f32>>,
}

impl Linear {
    /// Build from weight and optional bias.
    pub fn new(weight: Array2<f32>, bias: Option<Array1<f32>>) -> Self {
        Self { weight, bias }
    }

    /// Output feature count.
    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    /// Input feature count.
    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    /// Apply to a `[batch, in_features]` input.
    pub fn forward(&self, x: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.forward_with(x, &self.weight, self.bias.as_ref())
    }

    /// Apply with externally supplied (e.g. quantized) parameters.
    pub fn forward_with(
        &self,
        x: &ArrayD<f32>,
        weight: &Array2<f32>,
        bias: Option<&Array1<f32>>,
    ) -> Result<ArrayD<f32>> {
        let x2 = x
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|_| QuantError::ShapeMismatch {
                op: "linear",
                lhs: x.shape().to_vec(),
                rhs: weight.shape().to_vec(),
            })?;
        if x2.ncols() != weight.ncols() {
            return Err(QuantError::ShapeMismatch {
                op: "linear",
                lhs: x.shape().to_vec(),
                rhs: weight.shape().to_vec(),
            });
        }
        let mut y = x2.dot(&weight.t());
        if let Some(b) = bias {
            y += &b.view().insert_axis(ndarray::Axis(0));
        }
        Ok(y.into_dyn())
    }
}
