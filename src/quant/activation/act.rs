//! Quantized activation with learnable clip bounds.

use ndarray::ArrayD;

use crate::error::Result;
use crate::quant::functions::{
    almost_symmetric, quantize, quantize_backward, quantize_noisy, tqt_backward, tqt_bounds,
    tqt_quantize, QuantizeGrad, TqtState,
};
use crate::quant::stats::RunningStats;

use super::config::{ActConfig, ActKind, ClipInit};

/// Gradients produced by [`QuantAct::backward`].
#[derive(Clone, Debug)]
pub struct ActGrad {
    /// Gradient w.r.t. the input.
    pub dx: ArrayD<f32>,
    /// Gradient w.r.t. `clip_lo` (PACT mode, learnable bounds only).
    pub dclip_lo: f32,
    /// Gradient w.r.t. `clip_hi` (PACT mode, learnable bounds only).
    pub dclip_hi: f32,
    /// Normalized gradient w.r.t. `log_t` (TQT mode only).
    pub dlog_t: f32,
}

/// A PACT/TQT activation quantizer.
///
/// Lifecycle: the module is created in statistics-collection mode, where
/// forward runs the plain nonlinearity and records running statistics.
/// An external training controller calls [`QuantAct::start`], which
/// initializes the clip bounds from the statistics; from then on forward
/// always quantizes.
#[derive(Clone, Debug)]
pub struct QuantAct {
    cfg: ActConfig,
    clip_lo: f32,
    clip_hi: f32,
    /// Mutable copy of `cfg.symm`: epsilon reconciliation may flip an
    /// input between signed and unsigned placement.
    symm: bool,
    log_t: f32,
    tqt_state: Option<TqtState>,
    stats: RunningStats,
    started: bool,
}

impl QuantAct {
    /// Build an activation quantizer. Fails on invalid configuration.
    pub fn new(cfg: ActConfig) -> Result<Self> {
        cfg.validate()?;
        let (clip_lo, clip_hi) = if cfg.signed { (-1.0, 1.0) } else { (0.0, 1.0) };
        let tqt_state = cfg.tqt.then(|| TqtState::new(cfg.tqt_beta));
        Ok(Self {
            symm: cfg.symm,
            cfg,
            clip_lo,
            clip_hi,
            log_t: 0.0,
            tqt_state,
            stats: RunningStats::new(),
            started: false,
        })
    }

    /// Whether quantization is active.
    pub fn started(&self) -> bool {
        self.started
    }

    /// The module's configuration.
    pub fn config(&self) -> &ActConfig {
        &self.cfg
    }

    /// Read access to the collected statistics (for the controller).
    pub fn stats(&self) -> &RunningStats {
        &self.stats
    }

    /// Effective clip bounds, with the symmetric upper bound derived from
    /// the lower one where applicable.
    pub fn clip_bounds(&self) -> (f32, f32) {
        if self.cfg.tqt && self.started {
            return tqt_bounds(self.log_t);
        }
        let hi = if self.cfg.learn_clip && self.symm && self.cfg.signed {
            almost_symmetric(self.clip_lo, self.cfg.n_levels)
        } else {
            self.clip_hi
        };
        (self.clip_lo, hi)
    }

    /// Overwrite the clip bounds (used by epsilon reconciliation).
    pub fn set_clip_bounds(&mut self, lo: f32, hi: f32) {
        self.clip_lo = lo;
        self.clip_hi = hi;
        if self.cfg.tqt {
            self.log_t = hi.abs().max(f32::MIN_POSITIVE).log2();
        }
    }

    /// Flip the signed-symmetric placement flag (epsilon reconciliation).
    pub fn set_symm(&mut self, symm: bool) {
        self.symm = symm;
    }

    /// Whether this input is currently in signed-symmetric placement.
    pub fn symm(&self) -> bool {
        self.symm
    }

    /// The quantization step implied by the current bounds.
    pub fn eps(&self) -> f32 {
        let (lo, hi) = self.clip_bounds();
        (hi - lo) / (self.cfg.n_levels as f32 - 1.0)
    }

    /// Freeze bounds from statistics and enable quantization.
    ///
    /// Invoked by the external training controller after the warm-up
    /// phase; repeated calls are idempotent apart from re-deriving the
    /// bounds from the latest statistics.
    pub fn start(&mut self) {
        let (lo, hi) = match self.cfg.init_clip {
            ClipInit::Max => {
                if self.cfg.signed {
                    let m = self.stats.max().abs().max(self.stats.min().abs());
                    let m = if m > 0.0 { m } else { 1.0 };
                    (-m, almost_symmetric(-m, self.cfg.n_levels))
                } else {
                    let hi = self.stats.max();
                    (0.0, if hi > 0.0 { hi } else { 1.0 })
                }
            }
            ClipInit::Std => {
                let spread = self.cfg.nb_std * self.stats.std();
                if self.cfg.signed {
                    let m = (self.stats.mean().abs() + spread).max(f32::MIN_POSITIVE);
                    (-m, almost_symmetric(-m, self.cfg.n_levels))
                } else {
                    (0.0, (self.stats.mean() + spread).max(f32::MIN_POSITIVE))
                }
            }
            ClipInit::Const => (self.clip_lo, self.clip_hi),
        };
        self.clip_lo = lo;
        self.clip_hi = hi;
        if self.cfg.tqt {
            self.log_t = hi.abs().max(f32::MIN_POSITIVE).log2();
        }
        self.started = true;
    }

    /// Enable quantization with explicitly supplied bounds, bypassing the
    /// statistics-derived initialization.
    pub fn start_from_bounds(&mut self, lo: f32, hi: f32) {
        self.set_clip_bounds(lo, hi);
        self.started = true;
    }

    /// Forward pass.
    ///
    /// Collecting: applies the configured nonlinearity and updates the
    /// running statistics. Started: quantizes onto the current grid.
    pub fn forward(&mut self, x: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        if !self.started {
            self.stats.update(x);
            return Ok(self.apply_act(x));
        }
        if self.cfg.tqt {
            return tqt_quantize(x, self.log_t, self.cfg.n_levels, self.cfg.rounding);
        }
        let (lo, hi) = self.clip_bounds();
        let eps = self.eps();
        if self.cfg.noisy {
            quantize_noisy(x, eps, lo, hi, self.cfg.rounding, &mut rand::thread_rng())
        } else {
            quantize(x, eps, lo, hi, self.cfg.rounding)
        }
    }

    /// Backward pass for a started module.
    ///
    /// `y` must be the forward output for the same `x` (TQT needs the
    /// quantization residual).
    pub fn backward(&mut self, grad: &ArrayD<f32>, x: &ArrayD<f32>, y: &ArrayD<f32>) -> ActGrad {
        if self.cfg.tqt {
            let state = self
                .tqt_state
                .as_mut()
                .expect("TQT state exists when cfg.tqt is set");
            let g = tqt_backward(grad, x, y, self.log_t, state, self.cfg.tqt_clip_grad);
            return ActGrad {
                dx: g.dx,
                dclip_lo: 0.0,
                dclip_hi: 0.0,
                dlog_t: g.dlog_t,
            };
        }
        let (lo, hi) = self.clip_bounds();
        let QuantizeGrad {
            dx,
            dclip_lo,
            dclip_hi,
        } = quantize_backward(grad, x, lo, hi, true);
        ActGrad {
            dx,
            dclip_lo: if self.cfg.learn_clip { dclip_lo } else { 0.0 },
            dclip_hi: if self.cfg.learn_clip && !(self.symm && self.cfg.signed) {
                dclip_hi
            } else {
                0.0
            },
            dlog_t: 0.0,
        }
    }

    fn apply_act(&self, x: &ArrayD<f32>) -> ArrayD<f32> {
        match self.cfg.act_kind {
            ActKind::Identity => x.clone(),
            ActKind::Relu => x.mapv(|v| v.max(0.0)),
            ActKind::Relu6 => x.mapv(|v| v.clamp(0.0, 6.0)),
            ActKind::LeakyRelu => {
                let slope = self.cfg.leaky;
                x.mapv(|v| if v >= 0.0 { v } else { slope * v })
            }
            ActKind::HardTanh => x.mapv(|v| v.clamp(-1.0, 1.0)),
        }
    }
}
