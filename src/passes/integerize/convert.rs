//! Fake-to-true conversion: the integerization pass.

use tracing::debug;

use crate::error::{QuantError, Result};
use crate::graph::{Graph, GraphModule, MetaKey, MetaTable, NodeId, NodeOp, OpTarget};
use crate::passes::wrapped::apply_to_wrapped;
use crate::passes::GraphPass;
use crate::quant::activation::QuantAct;
use crate::quant::functions::RoundingMode;
use crate::quant::norm::IntegerLayerNorm;
use crate::quant::requant::{Convention, RequantShift};

/// Converts a fake-quantized graph into one computing with integer
/// arithmetic and requantization only.
///
/// Started activations become [`RequantShift`] operators, fused
/// add/concat modules become per-input requants around plain integer
/// ops, linear operators switch to integer weights and biases, and the
/// disassembled layer-norm chain collapses into an integer layer norm.
///
/// Integer tensors represent `value ≈ q · eps`; reassignment and bound
/// initialization keep every clip bound an integer multiple of its eps,
/// so no explicit zero-points are needed — the requant clip enforces the
/// range.
///
/// Partial or invalid structure (missing metadata, an activation still
/// collecting statistics, a fused layer norm) aborts the pass: silent
/// partial integerization produces numerically wrong deployed models.
pub struct IntegerizePass {
    d: i64,
    d_layernorm: f32,
    convention: Convention,
}

impl IntegerizePass {
    const NAME: &'static str = "integerize";

    /// Build with the default scaling constants (`D = 2^16`,
    /// layer-norm `D = 2^24`) and the given rounding convention.
    pub fn new(convention: Convention) -> Self {
        Self {
            d: 1 << 16,
            d_layernorm: IntegerLayerNorm::DEFAULT_D,
            convention,
        }
    }

    /// Override the requantization scaling constant.
    pub fn with_d(mut self, d: i64) -> Self {
        self.d = d;
        self
    }

    /// Requant parameters mapping integers at `eps_in` to the grid of
    /// `act`.
    fn act_requant(&self, act: &QuantAct, eps_in: f32, name: &str) -> Result<RequantShift> {
        if !act.started() {
            return Err(QuantError::NotStarted(name.to_string()));
        }
        let eps_out = act.eps();
        if eps_out <= 0.0 {
            return Err(QuantError::NonPositiveEps { eps: eps_out });
        }
        let mul = ((self.d as f64) * f64::from(eps_in) / f64::from(eps_out)).floor() as i64;
        if mul <= 0 {
            return Err(QuantError::NonPositiveEps { eps: eps_in });
        }
        // flooring hardware reproduces round-to-nearest when half the
        // divisor is folded into the additive term
        let add = match (self.convention, act.config().rounding) {
            (Convention::ScaleFirst, RoundingMode::Round) => self.d / 2,
            _ => 0,
        };
        let (lo, _) = act.clip_bounds();
        RequantShift::new(
            mul,
            add,
            self.d,
            lo < 0.0,
            act.config().n_levels as i64,
            self.convention,
        )
    }

    fn eps_in_of(&self, meta: &MetaTable, id: NodeId, slot: usize) -> Result<f32> {
        meta.get(id)
            .and_then(|m| m.eps_in.as_ref())
            .and_then(|v| v.get(slot).copied())
            .ok_or(QuantError::MissingMetadata {
                node: id,
                key: MetaKey::EpsIn,
                producer: "annotate",
            })
    }

    fn convert_act(&self, graph: &mut Graph, meta: &MetaTable, id: NodeId, name: &str) -> Result<()> {
        let eps_in = self.eps_in_of(meta, id, 0)?;
        let rqs = {
            let GraphModule::Act(act) = graph.module(name)? else {
                unreachable!("caller matched an Act module");
            };
            self.act_requant(act, eps_in, name)?
        };
        graph.replace_module(name, GraphModule::Requant(rqs))?;
        Ok(())
    }

    fn convert_add(&self, graph: &mut Graph, meta: &MetaTable, id: NodeId, name: &str) -> Result<()> {
        let args = graph.node(id).args.clone();
        let (input_rqs, out_rqs) = {
            let GraphModule::Add(add) = graph.module(name)? else {
                unreachable!("caller matched an Add module");
            };
            let mut input_rqs = Vec::with_capacity(args.len());
            for (slot, act) in add.acts().iter().enumerate() {
                let eps_in = self.eps_in_of(meta, id, slot)?;
                input_rqs.push(self.act_requant(act, eps_in, name)?);
            }
            // the summed integers live on the common input grid
            let eps_common = add
                .acts()
                .first()
                .map(QuantAct::eps)
                .ok_or(QuantError::InputArity { expected: 1, got: 0 })?;
            let out_rqs = self.act_requant(add.act_out(), eps_common, name)?;
            (input_rqs, out_rqs)
        };

        let mut requant_nodes = Vec::with_capacity(args.len());
        for (slot, rqs) in input_rqs.into_iter().enumerate() {
            let rq_name = format!("{name}_rqs_in_{slot}");
            graph.add_module(&rq_name, GraphModule::Requant(rqs))?;
            let node = graph.insert_call_module_before(id, &rq_name, vec![args[slot]])?;
            requant_nodes.push(node);
        }
        let sum_node = graph.insert_call_before(id, OpTarget::Add, requant_nodes)?;
        let out_name = format!("{name}_rqs_out");
        graph.add_module(&out_name, GraphModule::Requant(out_rqs))?;
        let out_node = graph.insert_call_module_before(id, &out_name, vec![sum_node])?;

        graph.replace_all_uses(id, out_node);
        graph.erase_node(id)?;
        graph.delete_module(name)?;
        Ok(())
    }

    fn convert_concat(
        &self,
        graph: &mut Graph,
        meta: &MetaTable,
        id: NodeId,
        name: &str,
    ) -> Result<()> {
        let args = graph.node(id).args.clone();
        let (input_rqs, dim, stack) = {
            let GraphModule::Concat(cat) = graph.module(name)? else {
                unreachable!("caller matched a Concat module");
            };
            let mut input_rqs = Vec::with_capacity(args.len());
            for (slot, act) in cat.acts().iter().enumerate() {
                let eps_in = self.eps_in_of(meta, id, slot)?;
                input_rqs.push(self.act_requant(act, eps_in, name)?);
            }
            (input_rqs, cat.dim(), cat.stack())
        };

        let mut requant_nodes = Vec::with_capacity(args.len());
        for (slot, rqs) in input_rqs.into_iter().enumerate() {
            let rq_name = format!("{name}_rqs_in_{slot}");
            graph.add_module(&rq_name, GraphModule::Requant(rqs))?;
            let node = graph.insert_call_module_before(id, &rq_name, vec![args[slot]])?;
            requant_nodes.push(node);
        }
        let target = if stack {
            OpTarget::Stack { dim }
        } else {
            OpTarget::Concat { dim }
        };
        let cat_node = graph.insert_call_before(id, target, requant_nodes)?;

        graph.replace_all_uses(id, cat_node);
        graph.erase_node(id)?;
        graph.delete_module(name)?;
        Ok(())
    }

    fn convert_norm_chain(
        &self,
        graph: &mut Graph,
        id: NodeId,
        norm_name: &str,
    ) -> Result<bool> {
        // match Normalize -> Affine -> Act, each single-use
        let norm_users = graph.users(id);
        let [affine_node] = norm_users.as_slice() else {
            return Ok(false);
        };
        let NodeOp::CallModule(affine_name) = graph.node(*affine_node).op.clone() else {
            return Ok(false);
        };
        let GraphModule::Affine(affine) = graph.module(&affine_name)? else {
            return Ok(false);
        };
        let (weight, bias) = (affine.weight.clone(), affine.bias.clone());

        let affine_users = graph.users(*affine_node);
        let [act_node] = affine_users.as_slice() else {
            return Ok(false);
        };
        let NodeOp::CallModule(act_name) = graph.node(*act_node).op.clone() else {
            return Ok(false);
        };
        let GraphModule::Act(act) = graph.module(&act_name)? else {
            return Ok(false);
        };
        if !act.started() {
            return Err(QuantError::NotStarted(act_name.clone()));
        }
        let (lo, hi) = act.clip_bounds();
        let n_levels = act.config().n_levels;
        let maxval = lo.abs().max(hi.abs());

        let iln = IntegerLayerNorm::from_affine(n_levels, maxval, &weight, &bias, self.d_layernorm)?;
        let iln_name = format!("{norm_name}_int");
        graph.add_module(&iln_name, GraphModule::IntLayerNorm(iln))?;
        let args = graph.node(id).args.clone();
        let iln_node = graph.insert_call_module_before(id, &iln_name, args)?;

        let (affine_node, act_node) = (*affine_node, *act_node);
        graph.replace_all_uses(act_node, iln_node);
        graph.erase_node(act_node)?;
        graph.erase_node(affine_node)?;
        graph.erase_node(id)?;
        graph.delete_module(&act_name)?;
        graph.delete_module(&affine_name)?;
        graph.delete_module(norm_name)?;
        Ok(true)
    }
}

impl GraphPass for IntegerizePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn requires(&self) -> &'static [MetaKey] {
        &[MetaKey::Shape, MetaKey::EpsIn, MetaKey::EpsOut]
    }

    fn run(&self, graph: &mut Graph, meta: &mut MetaTable) -> Result<()> {
        // wrapped submodules first, so their boundary epsilons are final
        // before the outer graph reads them
        apply_to_wrapped(self, graph, meta)?;

        let mut visited = 0usize;
        for id in graph.order_ids() {
            if graph.node(id).is_removed() {
                continue;
            }
            let NodeOp::CallModule(name) = graph.node(id).op.clone() else {
                continue;
            };
            match graph.module(&name)?.kind() {
                crate::graph::ModuleKind::Act => self.convert_act(graph, meta, id, &name)?,
                crate::graph::ModuleKind::Add => self.convert_add(graph, meta, id, &name)?,
                crate::graph::ModuleKind::Concat => self.convert_concat(graph, meta, id, &name)?,
                crate::graph::ModuleKind::Matmul => {
                    let args = graph.node(id).args.clone();
                    let mm = graph.insert_call_before(id, OpTarget::Matmul, args)?;
                    graph.replace_all_uses(id, mm);
                    graph.erase_node(id)?;
                    graph.delete_module(&name)?;
                }
                crate::graph::ModuleKind::Linear
                | crate::graph::ModuleKind::Conv1d
                | crate::graph::ModuleKind::Conv2d => {
                    let eps_in = self.eps_in_of(meta, id, 0)?;
                    match graph.module_mut(&name)? {
                        GraphModule::LinOp(op) => op.integerize(eps_in, &name)?,
                        // a plain float operator here means the
                        // float-to-fake conversion never wrapped it
                        _ => {
                            return Err(QuantError::Config {
                                param: "linear",
                                reason: format!(
                                    "module '{name}' is an unquantized float operator; \
                                     wrap it in a quantized linear op before integerizing"
                                ),
                            })
                        }
                    }
                }
                crate::graph::ModuleKind::Normalize => {
                    if !self.convert_norm_chain(graph, id, &name)? {
                        return Err(QuantError::Config {
                            param: "normalize",
                            reason: format!(
                                "module '{name}' is not part of a norm/affine/activation chain"
                            ),
                        });
                    }
                }
                crate::graph::ModuleKind::LayerNorm => {
                    return Err(QuantError::Config {
                        param: "layernorm",
                        reason: format!(
                            "fused layer norm '{name}' cannot be integerized directly; \
                             run the 'layernorm_disassemble' pass first"
                        ),
                    });
                }
                _ => {}
            }
            visited += 1;
        }
        debug!(visited, "integerization complete");
        Ok(())
    }
}
