//! Activation quantizer configuration.

use serde::{Deserialize, Serialize};

use crate::error::{QuantError, Result};
use crate::quant::functions::RoundingMode;

/// Nonlinearity applied while a module is still collecting statistics.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
pub enum ActKind {
    /// Pass values through unchanged.
    #[default]
    Identity,
    /// Rectified linear unit.
    Relu,
    /// ReLU clipped at 6.
    Relu6,
    /// Leaky ReLU; slope comes from [`ActConfig::leaky`].
    LeakyRelu,
    /// Hard tanh, clipping to `[-1, 1]`.
    HardTanh,
}

/// How the controller initializes clip bounds when starting a module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ClipInit {
    /// Use the extreme values observed during statistics collection.
    #[default]
    Max,
    /// Use `mean ± nb_std · std` from the running statistics.
    Std,
    /// Keep the preset constant bounds.
    Const,
}

/// Configuration for a [`QuantAct`](super::QuantAct).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActConfig {
    /// Number of quantization levels (e.g. 256 for 8 bit).
    pub n_levels: usize,
    /// Clip-bound initialization strategy.
    pub init_clip: ClipInit,
    /// Whether the clip bounds are gradient-trainable.
    pub learn_clip: bool,
    /// Unquantized nonlinearity used during statistics collection.
    pub act_kind: ActKind,
    /// Negative slope for [`ActKind::LeakyRelu`].
    pub leaky: f32,
    /// Standard deviations from the mean for [`ClipInit::Std`].
    pub nb_std: f32,
    /// Enforce almost-symmetric bounds in signed mode.
    pub symm: bool,
    /// Whether this activation produces signed values.
    pub signed: bool,
    /// Add uniform quantization noise during training.
    pub noisy: bool,
    /// Grid rounding mode.
    pub rounding: RoundingMode,
    /// Use the TQT algorithm (single log-threshold parameter).
    pub tqt: bool,
    /// Momentum for TQT gradient-variance tracking.
    pub tqt_beta: f32,
    /// Squash normalized TQT gradients through tanh.
    pub tqt_clip_grad: bool,
}

impl Default for ActConfig {
    fn default() -> Self {
        Self {
            n_levels: 256,
            init_clip: ClipInit::Max,
            learn_clip: true,
            act_kind: ActKind::Identity,
            leaky: 0.1,
            nb_std: 3.0,
            symm: true,
            signed: true,
            noisy: false,
            rounding: RoundingMode::Floor,
            tqt: false,
            tqt_beta: 0.9,
            tqt_clip_grad: true,
        }
    }
}

impl ActConfig {
    /// Unsigned activation config (lower bound pinned to zero).
    pub fn unsigned(n_levels: usize) -> Self {
        Self {
            n_levels,
            signed: false,
            symm: false,
            act_kind: ActKind::Relu,
            ..Self::default()
        }
    }

    /// Signed, almost-symmetric activation config.
    pub fn signed(n_levels: usize) -> Self {
        Self {
            n_levels,
            ..Self::default()
        }
    }

    /// Validate option combinations. Fails fast at construction so that
    /// forward never has to.
    pub fn validate(&self) -> Result<()> {
        if self.n_levels < 2 {
            return Err(QuantError::Config {
                param: "n_levels",
                reason: format!("{} (need at least 2 levels)", self.n_levels),
            });
        }
        if self.tqt && !(self.learn_clip && self.symm && !self.noisy) {
            return Err(QuantError::Config {
                param: "tqt",
                reason: format!(
                    "TQT requires learn_clip=true, symm=true, noisy=false \
                     (got learn_clip={}, symm={}, noisy={})",
                    self.learn_clip, self.symm, self.noisy
                ),
            });
        }
        if self.tqt && !self.signed {
            return Err(QuantError::Config {
                param: "tqt",
                reason: "TQT supports signed symmetric activations only".into(),
            });
        }
        if !(0.0..1.0).contains(&self.tqt_beta) {
            return Err(QuantError::Config {
                param: "tqt_beta",
                reason: format!("{} (must be in [0, 1))", self.tqt_beta),
            });
        }
        Ok(())
    }
}
