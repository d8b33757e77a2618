//! Fake-quantized addition over an arbitrary number of inputs.

use ndarray::ArrayD;

use crate::error::{QuantError, Result};
use crate::quant::activation::{ActConfig, QuantAct};

use super::policy::SignednessPolicy;

/// Fake-quantized addition node.
///
/// Each input passes through its own [`QuantAct`] before being summed,
/// and the sum through an independently managed output activation. The
/// training controller calls [`reassign_epsilons`](Self::reassign_epsilons)
/// once per optimization step so that all input epsilons are identical at
/// integerization time.
#[derive(Clone, Debug)]
pub struct QuantAdd {
    acts: Vec<QuantAct>,
    act_out: QuantAct,
    n_levels: usize,
    force_out_eps: bool,
    policy: SignednessPolicy,
}

impl QuantAdd {
    /// Build an adder with `num_args` quantized inputs.
    ///
    /// `force_out_eps` selects the forced mode in which reconciliation
    /// copies the output activation's range onto every input — used when
    /// an external epsilon target is mandated.
    pub fn new(num_args: usize, cfg: ActConfig, force_out_eps: bool) -> Result<Self> {
        if num_args == 0 {
            return Err(QuantError::Config {
                param: "num_args",
                reason: "addition needs at least one input".into(),
            });
        }
        let acts = (0..num_args)
            .map(|_| QuantAct::new(cfg.clone()))
            .collect::<Result<Vec<_>>>()?;
        let act_out = QuantAct::new(cfg.clone())?;
        Ok(Self {
            acts,
            act_out,
            n_levels: cfg.n_levels,
            force_out_eps,
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

    /// The output activation.
    pub fn act_out(&self) -> &QuantAct {
        &self.act_out
    }

    /// Mutable output activation (controller access).
    pub fn act_out_mut(&mut self) -> &mut QuantAct {
        &mut self.act_out
    }

    /// Start every internal activation (controller shortcut).
    pub fn start_all(&mut self) {
        for act in &mut self.acts {
            act.start();
        }
        self.act_out.start();
    }

    /// Reconcile the input epsilons to a single common value.
    ///
    /// The input with the widest clip range wins; every other input's
    /// bounds are reassigned to a range of the same width, placed
    /// signed-symmetric or unsigned according to the configured policy.
    /// Mutates learnable parameters, so this must run between optimizer
    /// steps, never inside forward.
    pub fn reassign_epsilons(&mut self) {
        if self.force_out_eps {
            let (lo, hi) = self.act_out.clip_bounds();
            for act in &mut self.acts {
                act.set_clip_bounds(lo, hi);
            }
            return;
        }

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

    /// Quantize each input, sum, and quantize the result.
    pub fn forward(&mut self, xs: &[ArrayD<f32>]) -> Result<ArrayD<f32>> {
        if xs.len() != self.acts.len() {
            return Err(QuantError::InputArity {
                expected: self.acts.len(),
                got: xs.len(),
            });
        }
        let mut total = self.acts[0].forward(&xs[0])?;
        for (act, x) in self.acts[1..].iter_mut().zip(&xs[1..]) {
            let q = act.forward(x)?;
            if q.raw_dim() != total.raw_dim() {
                return Err(QuantError::ShapeMismatch {
                    op: "add",
                    lhs: total.shape().to_vec(),
                    rhs: q.shape().to_vec(),
                });
            }
            total += &q;
        }
        self.act_out.forward(&total)
    }
}
