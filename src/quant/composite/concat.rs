//! Fake-quantized concatenation.

use ndarray::{ArrayD, Axis};

use crate::error::{QuantError, Result};
use crate::quant::activation::{ActConfig, QuantAct};

use super::policy::SignednessPolicy;

/// Fake-quantized concatenation node.
///
/// Each input is requantized through its own [`QuantAct`] before being
/// concatenated; `stack` mode inserts a fresh axis on every input first.
/// Unlike addition there is no output activation: the concatenated tensor
/// keeps the (reconciled) input grid.
#[derive(Clone, Debug)]
pub struct QuantConcat {
    acts: Vec<QuantAct>,
    dim: usize,
    stack: bool,
    n_levels: usize,
    policy: SignednessPolicy,
}

impl QuantConcat {
    /// Build a concatenation over `num_args` inputs along `dim`.
    pub fn new(num_args: usize, dim: usize, stack: bool, cfg: ActConfig) -> Result<Self> {
        if num_args == 0 {
            return Err(QuantError::Config {
                param: "num_args",
                reason: "concatenation needs at least one input".into(),
            });
        }
        let acts = (0..num_args)
            .map(|_| QuantAct::new(cfg.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            acts,
            dim,
            stack,
            n_levels: cfg.n_levels,
            policy: SignednessPolicy::default(),
        })
    }

    /// Override the signedness placement policy.
    pub fn with_policy(mut self, policy: SignednessPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Number of quantized inputs.
    pub fn num_args(&self) -> usize {
        self.acts.len()
    }

    /// Input activations.
    pub fn acts(&self) -> &[QuantAct] {
        &self.acts
    }

    /// Mutable input activations (controller access).
    pub fn acts_mut(&mut self) -> &mut [QuantAct] {
        &mut self.acts
    }

    /// Concatenation axis.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Whether inputs gain a fresh axis before concatenation.
    pub fn stack(&self) -> bool {
        self.stack
    }

    /// Start every internal activation.
    pub fn start_all(&mut self) {
        for act in &mut self.acts {
            act.start();
        }
    }

    /// Reconcile input epsilons; see [`QuantAdd::reassign_epsilons`].
    ///
    /// [`QuantAdd::reassign_epsilons`]: super::QuantAdd::reassign_epsilons
    pub fn reassign_epsilons(&mut self) {
        let n = self.n_levels as f32;
        let mut eps = f32::INFINITY;
        let mut widest = f32::NEG_INFINITY;
        for act in &self.acts {
            let (lo, hi) = act.clip_bounds();
            if hi - lo > widest {
                widest = hi - lo;
                eps = widest / (n - 1.0);
            }
        }
        for act in &mut self.acts {
            if self.policy.is_unsigned(act) {
                act.set_symm(false);
                act.set_clip_bounds(0.0, eps * (n - 1.0));
            } else {
                act.set_symm(true);
                act.set_clip_bounds(-(n / 2.0) * eps, (n / 2.0 - 1.0) * eps);
            }
        }
    }

    /// Quantize each input and concatenate along the configured axis.
    pub fn forward(&mut self, xs: &[ArrayD<f32>]) -> Result<ArrayD<f32>> {
        if xs.len() != self.acts.len() {
            return Err(QuantError::InputArity {
                expected: self.acts.len(),
                got: xs.len(),
            });
        }
        let mut parts = Vec::with_capacity(xs.len());
        for (act, x) in self.acts.iter_mut().zip(xs) {
            let q = act.forward(x)?;
            parts.push(if self.stack {
                q.insert_axis(Axis(self.dim))
            } else {
                q
            });
        }
        let views: Vec<_> = parts.iter().map(ArrayD::view).collect();
        ndarray::concatenate(Axis(self.dim), &views).map_err(|_| QuantError::ShapeMismatch {
            op: "concat",
            lhs: parts[0].shape().to_vec(),
            rhs: parts.last().map(|p| p.shape().to_vec()).unwrap_or_default(),
        })
    }
}
