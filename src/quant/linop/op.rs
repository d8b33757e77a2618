//! Quantized linear operators (conv / fully connected).

use ndarray::{Array1, ArrayD, Axis};

use crate::error::{QuantError, Result};
use crate::nn::{Conv1d, Conv2d, Linear};
use crate::quant::functions::{almost_symmetric, quantize};

use super::config::{Granularity, WeightInit, WeightQuantConfig};

/// The linear operator variants a quantized wrapper can hold.
///
/// An explicit tagged enum instead of runtime type dispatch: each variant
/// has a uniform `from_*` constructor on [`QuantLinearOp`] and the wrapper
/// treats all of them through the same weight-grid interface.
#[derive(Clone, Debug)]
pub enum LinOpKind {
    /// Fully connected layer.
    Linear(Linear),
    /// 1-D convolution.
    Conv1d(Conv1d),
    /// 2-D convolution.
    Conv2d(Conv2d),
}

impl LinOpKind {
    /// Output channel / feature count (the per-channel axis length).
    pub fn out_channels(&self) -> usize {
        match self {
            Self::Linear(l) => l.out_features(),
            Self::Conv1d(c) => c.out_channels(),
            Self::Conv2d(c) => c.out_channels(),
        }
    }

    fn weight_dyn(&self) -> ArrayD<f32> {
        match self {
            Self::Linear(l) => l.weight.clone().into_dyn(),
            Self::Conv1d(c) => c.weight.clone().into_dyn(),
            Self::Conv2d(c) => c.weight.clone().into_dyn(),
        }
    }

    fn bias(&self) -> Option<&Array1<f32>> {
        match self {
            Self::Linear(l) => l.bias.as_ref(),
            Self::Conv1d(c) => c.bias.as_ref(),
            Self::Conv2d(c) => c.bias.as_ref(),
        }
    }

    fn forward_with(
        &self,
        x: &ArrayD<f32>,
        weight: &ArrayD<f32>,
        bias: Option<&Array1<f32>>,
    ) -> Result<ArrayD<f32>> {
        match self {
            Self::Linear(l) => {
                let w = weight
                    .view()
                    .into_dimensionality()
                    .map_err(|_| QuantError::ShapeMismatch {
                        op: "linear",
                        lhs: weight.shape().to_vec(),
                        rhs: l.weight.shape().to_vec(),
                    })?;
                l.forward_with(x, &w.to_owned(), bias)
            }
            Self::Conv1d(c) => {
                let w = weight
                    .view()
                    .into_dimensionality()
                    .map_err(|_| QuantError::ShapeMismatch {
                        op: "conv1d",
                        lhs: weight.shape().to_vec(),
                        rhs: c.weight.shape().to_vec(),
                    })?;
                c.forward_with(x, &w.to_owned(), bias)
            }
            Self::Conv2d(c) => {
                let w = weight
                    .view()
                    .into_dimensionality()
                    .map_err(|_| QuantError::ShapeMismatch {
                        op: "conv2d",
                        lhs: weight.shape().to_vec(),
                        rhs: c.weight.shape().to_vec(),
                    })?;
                c.forward_with(x, &w.to_owned(), bias)
            }
        }
    }
}

/// A linear operator with quantized weights.
///
/// Lifecycle mirrors activations: created unquantized, weights run in
/// plain float until [`start`](Self::start) freezes clip bounds from the
/// weight statistics; from then on forward uses the fake-quantized
/// weights. Parameters can additionally be frozen to a snapshot so an
/// optimizer cannot move them.
#[derive(Clone, Debug)]
pub struct QuantLinearOp {
    kind: LinOpKind,
    cfg: WeightQuantConfig,
    clip_lo: Array1<f32>,
    clip_hi: Array1<f32>,
    started: bool,
    params_frozen: bool,
    weight_frozen: Option<ArrayD<f32>>,
    bias_frozen: Option<Array1<f32>>,
    integerized: bool,
}

impl QuantLinearOp {
    fn new(kind: LinOpKind, cfg: WeightQuantConfig) -> Result<Self> {
        cfg.validate()?;
        let lanes = match cfg.granularity {
            Granularity::PerLayer => 1,
            Granularity::PerChannel => kind.out_channels(),
        };
        Ok(Self {
            kind,
            cfg,
            clip_lo: Array1::from_elem(lanes, -1.0),
            clip_hi: Array1::from_elem(lanes, 1.0),
            started: false,
            params_frozen: false,
            weight_frozen: None,
            bias_frozen: None,
            integerized: false,
        })
    }

    /// Wrap an existing fully connected layer.
    pub fn from_linear(linear: Linear, cfg: WeightQuantConfig) -> Result<Self> {
        Self::new(LinOpKind::Linear(linear), cfg)
    }

    /// Wrap an existing 1-D convolution.
    pub fn from_conv1d(conv: Conv1d, cfg: WeightQuantConfig) -> Result<Self> {
        Self::new(LinOpKind::Conv1d(conv), cfg)
    }

    /// Wrap an existing 2-D convolution.
    pub fn from_conv2d(conv: Conv2d, cfg: WeightQuantConfig) -> Result<Self> {
        Self::new(LinOpKind::Conv2d(conv), cfg)
    }

    /// Which operator variant this wraps.
    pub fn kind(&self) -> &LinOpKind {
        &self.kind
    }

    /// The weight quantization configuration.
    pub fn config(&self) -> &WeightQuantConfig {
        &self.cfg
    }

    /// Whether weight quantization is active.
    pub fn started(&self) -> bool {
        self.started
    }

    /// Whether the operator has been converted to integer parameters.
    pub fn integerized(&self) -> bool {
        self.integerized
    }

    /// Initialize clip bounds from the weights and enable quantization.
    pub fn start(&mut self) {
        let weight = self.kind.weight_dyn();
        let lanes = self.clip_lo.len();
        for lane in 0..lanes {
            let stats: Vec<f32> = if self.cfg.granularity == Granularity::PerChannel {
                weight.index_axis(Axis(0), lane).iter().copied().collect()
            } else {
                weight.iter().copied().collect()
            };
            let (lo, hi) = match self.cfg.init_clip {
                WeightInit::Max => {
                    let m = stats.iter().fold(0.0f32, |a, &v| a.max(v.abs()));
                    let m = if m > 0.0 { m } else { 1.0 };
                    (-m, m)
                }
                WeightInit::Std => {
                    let mean = stats.iter().sum::<f32>() / stats.len().max(1) as f32;
                    let var = stats.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>()
                        / stats.len().max(1) as f32;
                    let m = (mean.abs() + self.cfg.nb_std * var.sqrt()).max(f32::MIN_POSITIVE);
                    (-m, m)
                }
                WeightInit::Const => (-1.0, 1.0),
            };
            self.clip_lo[lane] = lo;
            self.clip_hi[lane] = if self.cfg.symm_wts {
                almost_symmetric(lo, self.cfg.n_levels)
            } else {
                hi
            };
        }
        self.started = true;
    }

    /// Per-lane weight quantization step.
    pub fn eps_w(&self) -> Array1<f32> {
        let n = self.cfg.n_levels as f32;
        (&self.clip_hi - &self.clip_lo) / (n - 1.0)
    }

    /// Per-lane output pre-activation step given the input step.
    pub fn eps_out(&self, eps_in: f32) -> Array1<f32> {
        self.eps_w() * eps_in
    }

    /// The fake-quantized weight tensor.
    pub fn weight_q(&self) -> Result<ArrayD<f32>> {
        let weight = if self.params_frozen {
            self.weight_frozen
                .clone()
                .unwrap_or_else(|| self.kind.weight_dyn())
        } else {
            self.kind.weight_dyn()
        };
        let eps = self.eps_w();
        if self.cfg.granularity == Granularity::PerLayer {
            return quantize(
                &weight,
                eps[0],
                self.clip_lo[0],
                self.clip_hi[0],
                self.cfg.rounding,
            );
        }
        let mut out = weight.clone();
        for (c, mut channel) in out.axis_iter_mut(Axis(0)).enumerate() {
            let q = quantize(
                &channel.to_owned().into_dyn(),
                eps[c],
                self.clip_lo[c],
                self.clip_hi[c],
                self.cfg.rounding,
            )?;
            channel.assign(&q);
        }
        Ok(out)
    }

    /// Integer representation of the quantized weights.
    pub fn weight_int(&self) -> Result<ArrayD<f32>> {
        let q = self.weight_q()?;
        let eps = self.eps_w();
        if self.cfg.granularity == Granularity::PerLayer {
            return Ok(q.mapv(|v| (v / eps[0]).round()));
        }
        let mut out = q;
        for (c, mut channel) in out.axis_iter_mut(Axis(0)).enumerate() {
            channel.mapv_inplace(|v| (v / eps[c]).round());
        }
        Ok(out)
    }

    /// Bias quantized onto the output pre-activation grid.
    ///
    /// The bias is assumed to be representable at high bit width, so the
    /// clip range is effectively unbounded. A missing bias is substituted
    /// with zeros rather than treated as an error.
    pub fn bias_q(&self, eps_in: f32) -> Result<Array1<f32>> {
        let out_c = self.kind.out_channels();
        let bias = match self.kind.bias() {
            Some(b) => b.clone(),
            None => Array1::zeros(out_c),
        };
        let eps_out = self.eps_out(eps_in);
        let mut out = bias;
        for (c, v) in out.iter_mut().enumerate() {
            let eps = eps_out[c.min(eps_out.len() - 1)];
            if eps <= 0.0 {
                return Err(QuantError::NonPositiveEps { eps });
            }
            *v = (*v / eps).round() * eps;
        }
        Ok(out)
    }

    /// Integer representation of the quantized bias.
    pub fn bias_int(&self, eps_in: f32) -> Result<Array1<f32>> {
        let q = self.bias_q(eps_in)?;
        let eps_out = self.eps_out(eps_in);
        Ok(Array1::from_iter(q.iter().enumerate().map(|(c, &v)| {
            (v / eps_out[c.min(eps_out.len() - 1)]).round()
        })))
    }

    /// Snapshot the parameters so optimizer steps no longer move them.
    pub fn freeze_params(&mut self) {
        self.weight_frozen = Some(self.kind.weight_dyn());
        self.bias_frozen = self.kind.bias().cloned();
        self.params_frozen = true;
    }

    /// Release the parameter snapshot.
    pub fn unfreeze_params(&mut self) {
        self.params_frozen = false;
    }

    /// Replace the float parameters with their integer representations.
    ///
    /// After this call the operator computes on integer-valued tensors;
    /// the caller is responsible for requantizing its output downstream.
    pub fn integerize(&mut self, eps_in: f32, name: &str) -> Result<()> {
        if !self.started {
            return Err(QuantError::NotStarted(name.to_string()));
        }
        let w_int = self.weight_int()?;
        let b_int = self.bias_int(eps_in)?;
        match &mut self.kind {
            LinOpKind::Linear(l) => {
                l.weight = w_int
                    .into_dimensionality()
                    .expect("weight rank is preserved");
                l.bias = Some(b_int);
            }
            LinOpKind::Conv1d(c) => {
                c.weight = w_int
                    .into_dimensionality()
                    .expect("weight rank is preserved");
                c.bias = Some(b_int);
            }
            LinOpKind::Conv2d(c) => {
                c.weight = w_int
                    .into_dimensionality()
                    .expect("weight rank is preserved");
                c.bias = Some(b_int);
            }
        }
        self.integerized = true;
        self.started = false;
        Ok(())
    }

    /// Forward pass: plain weights before start, fake-quantized after,
    /// integer parameters once integerized.
    pub fn forward(&self, x: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        if self.integerized {
            return self.kind.forward_with(x, &self.kind.weight_dyn(), self.kind.bias());
        }
        if self.started {
            let w = self.weight_q()?;
            let bias = if self.params_frozen {
                self.bias_frozen.as_ref()
            } else {
                self.kind.bias()
            };
            return self.kind.forward_with(x, &w, bias);
        }
        if self.params_frozen {
            let w = self
                .weight_frozen
                .clone()
                .unwrap_or_else(|| self.kind.weight_dyn());
            return self
                .kind
                .forward_with(x, &w, self.bias_frozen.as_ref());
        }
        self.kind
            .forward_with(x, &self.kind.weight_dyn(), self.kind.bias())
    }
}
