//! Quantization-aware matrix multiplication.

use ndarray::{ArrayD, Ix2};

use crate::error::{QuantError, Result};

/// Matrix multiplication between two already-quantized operands.
///
/// The operands arrive on their own grids, so the product lives on the
/// product grid: `eps_out = eps_a * eps_b`. No activation state and no
/// epsilon reconciliation is needed.
#[derive(Clone, Copy, Debug, Default)]
pub struct QuantMatmul;

impl QuantMatmul {
    /// Build a matmul node.
    pub fn new() -> Self {
        Self
    }

    /// Output step size given the operand step sizes.
    pub fn eps_out(&self, eps_a: f32, eps_b: f32) -> f32 {
        eps_a * eps_b
    }

    /// Multiply two 2-D operands.
    pub fn forward(&self, a: &ArrayD<f32>, b: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let a2 = a
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|_| QuantError::ShapeMismatch {
                op: "matmul",
                lhs: a.shape().to_vec(),
                rhs: b.shape().to_vec(),
            })?;
        let b2 = b
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|_| QuantError::ShapeMismatch {
                op: "matmul",
                lhs: a.shape().to_vec(),
                rhs: b.shape().to_vec(),
            })?;
        if a2.ncols() != b2.nrows() {
            return Err(QuantError::ShapeMismatch {
                op: "matmul",
                lhs: a.shape().to_vec(),
                rhs: b.shape().to_vec(),
            });
        }
        Ok(a2.dot(&b2).into_dyn())
    }
}
