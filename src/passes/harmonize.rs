//! Harmonization: rewriting a traced float graph into fused
//! quantization-aware form.
//!
//! Runs of commutative binary operators collapse into fused modules with
//! per-input activation quantizers, and an activation quantizer is
//! inserted between any two directly cascaded linear operators so every
//! linear operator consumes a quantized input.

use crate::error::Result;
use crate::graph::{Graph, GraphModule, MetaTable, ModuleKind, NodeOp, OpKind};
use crate::quant::activation::{ActConfig, ActKind, QuantAct};
use crate::quant::composite::{QuantAdd, QuantConcat, QuantMatmul};

use super::optree::{TreeReplacePass, TreeSpec};
use super::{GraphPass, Pipeline};

/// Replaces runs of additions with fused [`QuantAdd`] modules.
pub struct AddTreeReplacePass {
    inner: TreeReplacePass,
}

impl AddTreeReplacePass {
    /// Build with the activation config used for every input quantizer.
    pub fn new(cfg: ActConfig, force_out_eps: bool) -> Self {
        let inner = TreeReplacePass::new(
            TreeSpec::new(&[OpKind::Add]),
            "add_replace",
            false,
            Box::new(move |tree, _graph| {
                let mut cfg = cfg.clone();
                cfg.act_kind = ActKind::Identity;
                Ok(Some(GraphModule::Add(QuantAdd::new(
                    tree.args().len(),
                    cfg,
                    force_out_eps,
                )?)))
            }),
        );
        Self { inner }
    }
}

impl GraphPass for AddTreeReplacePass {
    fn name(&self) -> &'static str {
        "add_replace"
    }

    fn run(&self, graph: &mut Graph, meta: &mut MetaTable) -> Result<()> {
        self.inner.run(graph, meta)
    }
}

/// Replaces matrix-multiplication nodes with quantization-aware matmul
/// modules.
///
/// Multiplication changes the output scale (the product grid), so runs
/// are never fused: every matching node closes its own single-node tree,
/// and anything that is not a plain two-operand product is declined.
pub struct MulTreeReplacePass {
    inner: TreeReplacePass,
}

impl MulTreeReplacePass {
    /// Build the pass.
    pub fn new() -> Self {
        let inner = TreeReplacePass::new(
            TreeSpec::new(&[OpKind::Matmul]),
            "mul_replace",
            true,
            Box::new(|tree, _graph| {
                if tree.args().len() != 2 {
                    return Ok(None);
                }
                Ok(Some(GraphModule::Matmul(QuantMatmul::new())))
            }),
        );
        Self { inner }
    }
}

impl Default for MulTreeReplacePass {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphPass for MulTreeReplacePass {
    fn name(&self) -> &'static str {
        "mul_replace"
    }

    fn run(&self, graph: &mut Graph, meta: &mut MetaTable) -> Result<()> {
        self.inner.run(graph, meta)
    }
}

/// Replaces concat and stack nodes with fused [`QuantConcat`] modules.
///
/// Concatenation changes shapes, so fusing several nodes into one
/// replacement is unsafe; every matching node becomes its own
/// single-node tree (`always_terminate`).
pub struct ConcatTreeReplacePass {
    cat: TreeReplacePass,
    stack: TreeReplacePass,
}

impl ConcatTreeReplacePass {
    /// Build with the activation config used for every input quantizer.
    pub fn new(cfg: ActConfig) -> Self {
        let cat_cfg = cfg.clone();
        let cat = TreeReplacePass::new(
            TreeSpec::new(&[OpKind::Concat]),
            "cat_replace",
            true,
            Box::new(move |tree, graph| {
                let dim = concat_dim(graph, tree.end());
                let mut cfg = cat_cfg.clone();
                cfg.act_kind = ActKind::Identity;
                Ok(Some(GraphModule::Concat(QuantConcat::new(
                    tree.args().len(),
                    dim,
                    false,
                    cfg,
                )?)))
            }),
        );
        let stack = TreeReplacePass::new(
            TreeSpec::new(&[OpKind::Stack]),
            "stack_replace",
            true,
            Box::new(move |tree, graph| {
                let dim = concat_dim(graph, tree.end());
                let mut cfg = cfg.clone();
                cfg.act_kind = ActKind::Identity;
                Ok(Some(GraphModule::Concat(QuantConcat::new(
                    tree.args().len(),
                    dim,
                    true,
                    cfg,
                )?)))
            }),
        );
        Self { cat, stack }
    }
}

fn concat_dim(graph: &Graph, node: crate::graph::NodeId) -> usize {
    match graph.node(node).op {
        NodeOp::Call(crate::graph::OpTarget::Concat { dim })
        | NodeOp::Call(crate::graph::OpTarget::Stack { dim }) => dim,
        _ => 0,
    }
}

impl GraphPass for ConcatTreeReplacePass {
    fn name(&self) -> &'static str {
        "concat_replace"
    }

    fn run(&self, graph: &mut Graph, meta: &mut MetaTable) -> Result<()> {
        self.cat.run(graph, meta)?;
        self.stack.run(graph, meta)
    }
}

/// Inserts an activation quantizer between directly cascaded linear
/// operators, so that every linear operator's input is quantized.
///
/// Matches on module kinds: an edge from a conv/linear/batch-norm module
/// call into a conv/linear module call gets a signed identity quantizer
/// spliced in.
pub struct InsertActivationsBetweenLinearsPass {
    cfg: ActConfig,
}

impl InsertActivationsBetweenLinearsPass {
    const BEFORE: &'static [ModuleKind] = &[
        ModuleKind::Conv1d,
        ModuleKind::Conv2d,
        ModuleKind::Linear,
        ModuleKind::BatchNorm,
    ];
    const AFTER: &'static [ModuleKind] = &[ModuleKind::Conv1d, ModuleKind::Conv2d, ModuleKind::Linear];

    /// Build with the config for the inserted quantizers. `signed`
    /// selects signed symmetric (the default for linear chains) versus
    /// unsigned placement.
    pub fn new(mut cfg: ActConfig, signed: bool) -> Self {
        cfg.act_kind = ActKind::Identity;
        cfg.signed = signed;
        if !signed {
            cfg.symm = false;
        }
        Self { cfg }
    }
}

impl GraphPass for InsertActivationsBetweenLinearsPass {
    fn name(&self) -> &'static str {
        "insert_linear_activations"
    }

    fn run(&self, graph: &mut Graph, _meta: &mut MetaTable) -> Result<()> {
        let module_kind = |graph: &Graph, id: crate::graph::NodeId| -> Option<ModuleKind> {
            match &graph.node(id).op {
                NodeOp::CallModule(name) => graph.module(name).ok().map(GraphModule::kind),
                _ => None,
            }
        };

        // collect matching edges first; splice afterwards so matching
        // never observes its own insertions
        let mut edges = Vec::new();
        for id in graph.order_ids() {
            let Some(after_kind) = module_kind(graph, id) else {
                continue;
            };
            if !Self::AFTER.contains(&after_kind) {
                continue;
            }
            for (slot, &arg) in graph.node(id).args.iter().enumerate() {
                if let Some(before_kind) = module_kind(graph, arg) {
                    if Self::BEFORE.contains(&before_kind) {
                        edges.push((arg, id, slot));
                    }
                }
            }
        }

        for (i, (src, dst, slot)) in edges.into_iter().enumerate() {
            let name = format!("linear_act_{i}");
            graph.add_module(&name, GraphModule::Act(QuantAct::new(self.cfg.clone())?))?;
            let act_node = graph.insert_call_module_before(dst, &name, vec![src])?;
            // rewire just this edge, not every use of `src`
            let node_args = {
                let mut args = graph.node(dst).args.clone();
                args[slot] = act_node;
                args
            };
            graph.set_node_args(dst, node_args);
        }
        Ok(())
    }
}

/// The standard harmonization sequence for a traced float network:
/// addition-tree replacement followed by linear-activation insertion.
pub struct HarmonizePass {
    pipeline: Pipeline,
}

impl HarmonizePass {
    /// Build the harmonization pipeline.
    pub fn new(cfg: ActConfig, force_out_eps: bool) -> Result<Self> {
        let pipeline = Pipeline::new(vec![
            Box::new(AddTreeReplacePass::new(cfg.clone(), force_out_eps)),
            Box::new(ConcatTreeReplacePass::new(cfg.clone())),
            Box::new(InsertActivationsBetweenLinearsPass::new(cfg, true)),
        ])?;
        Ok(Self { pipeline })
    }
}

impl GraphPass for HarmonizePass {
    fn name(&self) -> &'static str {
        "harmonize"
    }

    fn run(&self, graph: &mut Graph, meta: &mut MetaTable) -> Result<()> {
        self.pipeline.run(graph, meta)
    }
}
