//! Naive convolution layers.
//!
//! Reference implementations, not performance kernels: the quantization
//! core only needs numerically exact convolution semantics to validate
//! weight-grid behavior.

use ndarray::{Array1, Array3, Array4, ArrayD, Ix3, Ix4};

use crate::error::{QuantError, Result};

/// 1-D convolution, input `[batch, in_c, len]`.
#[derive(Clone, Debug)]
pub struct Conv1d {
    /// Kernel, shape `[out_c, in_c / groups, k]`.
    pub weight: Array3<f32>,
    /// Optional bias, length `out_c`.
    pub bias: Option<Array1<f32>>,
    /// Stride along the length axis.
    pub stride: usize,
    /// Zero padding on both ends.
    pub padding: usize,
    /// Kernel dilation.
    pub dilation: usize,
    /// Channel groups.
    pub groups: usize,
}

impl Conv1d {
    /// Build with unit stride/dilation, no padding, one group.
    pub fn new(weight: Array3<f32>, bias: Option<Array1<f32>>) -> Self {
        Self {
            weight,
            bias,
            stride: 1,
            padding: 0,
            dilation: 1,
            groups: 1,
        }
    }

    /// Output channel count.
    pub fn out_channels(&self) -> usize {
        self.weight.shape()[0]
    }

    /// Apply the convolution.
    pub fn forward(&self, x: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.forward_with(x, &self.weight, self.bias.as_ref())
    }

    /// Apply with externally supplied (e.g. quantized) parameters.
    pub fn forward_with(
        &self,
        x: &ArrayD<f32>,
        weight: &Array3<f32>,
        bias: Option<&Array1<f32>>,
    ) -> Result<ArrayD<f32>> {
        let x3 = x
            .view()
            .into_dimensionality::<Ix3>()
            .map_err(|_| QuantError::ShapeMismatch {
                op: "conv1d",
                lhs: x.shape().to_vec(),
                rhs: weight.shape().to_vec(),
            })?;
        let (batch, in_c, len) = x3.dim();
        let (out_c, group_c, k) = weight.dim();
        if in_c != group_c * self.groups || out_c % self.groups != 0 {
            return Err(QuantError::ShapeMismatch {
                op: "conv1d",
                lhs: x.shape().to_vec(),
                rhs: weight.shape().to_vec(),
            });
        }
        let span = self.dilation * (k - 1) + 1;
        let out_len = (len + 2 * self.padding).saturating_sub(span) / self.stride + 1;
        let out_per_group = out_c / self.groups;

        let mut y = Array3::<f32>::zeros((batch, out_c, out_len));
        for b in 0..batch {
            for oc in 0..out_c {
                let g = oc / out_per_group;
                for ol in 0..out_len {
                    let mut acc = bias.map_or(0.0, |bv| bv[oc]);
                    for ic in 0..group_c {
                        for kk in 0..k {
                            let pos = ol * self.stride + kk * self.dilation;
                            if pos < self.padding || pos - self.padding >= len {
                                continue;
                            }
                            acc += x3[[b, g * group_c + ic, pos - self.padding]]
                                * weight[[oc, ic, kk]];
                        }
                    }
                    y[[b, oc, ol]] = acc;
                }
            }
        }
        Ok(y.into_dyn())
    }
}

/// 2-D convolution, input `[batch, in_c, h, w]`.
#[derive(Clone, Debug)]
pub struct Conv2d {
    /// Kernel, shape `[out_c, in_c / groups, kh, kw]`.
    pub weight: Array4<f32>,
    /// Optional bias, length `out_c`.
    pub bias: Option<Array1<f32>>,
    /// Stride `(h, w)`.
    pub stride: (usize, usize),
    /// Zero padding `(h, w)`.
    pub padding: (usize, usize),
    /// Dilation `(h, w)`.
    pub dilation: (usize, usize),
    /// Channel groups.
    pub groups: usize,
}

impl Conv2d {
    /// Build with unit stride/dilation, no padding, one group.
    pub fn new(weight: Array4<f32>, bias: Option<Array1<f32>>) -> Self {
        Self {
            weight,
            bias,
            stride: (1, 1),
            padding: (0, 0),
            dilation: (1, 1),
            groups: 1,
        }
    }

    /// Output channel count.
    pub fn out_channels(&self) -> usize {
        self.weight.shape()[0]
    }

    /// Apply the convolution.
    pub fn forward(&self, x: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.forward_with(x, &self.weight, self.bias.as_ref())
    }

    /// Apply with externally supplied (e.g. quantized) parameters.
    pub fn forward_with(
        &self,
        x: &ArrayD<f32>,
        weight: &Array4<f32>,
        bias: Option<&Array1<f32>>,
    ) -> Result<ArrayD<f32>> {
        let x4 = x
            .view()
            .into_dimensionality::<Ix4>()
            .map_err(|_| QuantError::ShapeMismatch {
                op: "conv2d",
                lhs: x.shape().to_vec(),
                rhs: weight.shape().to_vec(),
            })?;
        let (batch, in_c, h, w) = x4.dim();
        let (out_c, group_c, kh, kw) = weight.dim();
        if in_c != group_c * self.groups || out_c % self.groups != 0 {
            return Err(QuantError::ShapeMismatch {
                op: "conv2d",
                lhs: x.shape().to_vec(),
                rhs: weight.shape().to_vec(),
            });
        }
        let span_h = self.dilation.0 * (kh - 1) + 1;
        let span_w = self.dilation.1 * (kw - 1) + 1;
        let out_h = (h + 2 * self.padding.0).saturating_sub(span_h) / self.stride.0 + 1;
        let out_w = (w + 2 * self.padding.1).saturating_sub(span_w) / self.stride.1 + 1;
        let out_per_group = out_c / self.groups;

        let mut y = Array4::<f32>::zeros((batch, out_c, out_h, out_w));
        for b in 0..batch {
            for oc in 0..out_c {
                let g = oc / out_per_group;
                for oh in 0..out_h {
                    for ow in 0..out_w {
                        let mut acc = bias.map_or(0.0, |bv| bv[oc]);
                        for ic in 0..group_c {
                            for r in 0..kh {
                                let ph = oh * self.stride.0 + r * self.dilation.0;
                                if ph < self.padding.0 || ph - self.padding.0 >= h {
                                    continue;
                                }
                                for c in 0..kw {
                                    let pw = ow * self.stride.1 + c * self.dilation.1;
                                    if pw < self.padding.1 || pw - self.padding.1 >= w {
                                        continue;
                                    }
                                    acc += x4[[
                                        b,
                                        g * group_c + ic,
                                        ph - self.padding.0,
                                        pw - self.padding.1,
                                    ]] * weight[[oc, ic, r, c]];
                                }
                            }
                        }
                        y[[b, oc, oh, ow]] = acc;
                    }
                }
            }
        }
        Ok(y.into_dyn())
    }
}
