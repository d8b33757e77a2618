//! Weight quantization configuration.

use serde::{Deserialize, Serialize};

use crate::error::{QuantError, Result};
use crate::quant::functions::RoundingMode;

/// Weight quantization granularity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Granularity {
    /// Single clip range for the whole weight tensor.
    #[default]
    PerLayer,
    /// Separate clip range per output channel (axis 0).
    PerChannel,
}

/// How weight clip bounds are initialized when quantization starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WeightInit {
    /// From the extreme absolute weight values.
    #[default]
    Max,
    /// From `mean ± nb_std · std` of the weights.
    Std,
    /// Keep the preset `[-1, 1]` bounds.
    Const,
}

/// Configuration for a [`QuantLinearOp`](super::QuantLinearOp).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WeightQuantConfig {
    /// Number of weight quantization levels.
    pub n_levels: usize,
    /// Per-layer or per-channel bounds.
    pub granularity: Granularity,
    /// Bound initialization strategy.
    pub init_clip: WeightInit,
    /// Whether the bounds are gradient-trainable.
    pub learn_clip: bool,
    /// Cover a symmetric range around zero (upper bound derived).
    pub symm_wts: bool,
    /// Standard deviations for [`WeightInit::Std`].
    pub nb_std: f32,
    /// Grid rounding; weights default to rounding, not flooring.
    pub rounding: RoundingMode,
}

impl Default for WeightQuantConfig {
    fn default() -> Self {
        Self {
            n_levels: 256,
            granularity: Granularity::PerLayer,
            init_clip: WeightInit::Max,
            learn_clip: false,
            symm_wts: true,
            nb_std: 3.0,
            rounding: RoundingMode::Round,
        }
    }
}

impl WeightQuantConfig {
    /// Validate option combinations.
    pub fn validate(&self) -> Result<()> {
        if self.n_levels < 2 {
            return Err(QuantError::Config {
                param: "n_levels",
                reason: format!("{} (need at least 2 levels)", self.n_levels),
            });
        }
        if self.init_clip == WeightInit::Const && self.symm_wts {
            return Err(QuantError::Config {
                param: "init_clip",
                reason: "constant bounds cannot be combined with symm_wts".into(),
            });
        }
        Ok(())
    }
}
