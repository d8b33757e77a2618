//! Layer-norm disassembly.

use crate::error::Result;
use crate::graph::{Graph, GraphModule, MetaTable, NodeOp};
use crate::nn::{Affine, Normalize};
use crate::passes::GraphPass;
use crate::quant::activation::{ActConfig, QuantAct};
use crate::quant::functions::almost_symmetric;

/// Splits every fused layer-norm module into three stages: a
/// floating-point normalization, a batch-affine carrying the learned
/// scale/bias, and a trailing quantized activation.
///
/// The fused form cannot be integerized directly; the decomposed chain
/// can (the integerization pass collapses it into an integer layer
/// norm).
pub struct LayerNormDisassemblePass;

impl GraphPass for LayerNormDisassemblePass {
    fn name(&self) -> &'static str {
        "layernorm_disassemble"
    }

    fn run(&self, graph: &mut Graph, _meta: &mut MetaTable) -> Result<()> {
        for id in graph.order_ids() {
            let NodeOp::CallModule(name) = graph.node(id).op.clone() else {
                continue;
            };
            let GraphModule::LayerNorm(ln) = graph.module(&name)? else {
                continue;
            };

            let n_levels = ln.n_levels();
            let maxval = ln.maxval();
            let weight = ln.weight.clone();
            let bias = ln.bias.clone();
            let args = graph.node(id).args.clone();

            let norm_name = format!("{name}_norm");
            let affine_name = format!("{name}_affine");
            let act_name = format!("{name}_act");

            graph.add_module(&norm_name, GraphModule::Normalize(Normalize::new()))?;
            graph.add_module(&affine_name, GraphModule::Affine(Affine::new(weight, bias)))?;
            let mut act = QuantAct::new(ActConfig::signed(n_levels))?;
            let lo = -maxval.max(f32::MIN_POSITIVE);
            act.start_from_bounds(lo, almost_symmetric(lo, n_levels));
            graph.add_module(&act_name, GraphModule::Act(act))?;

            let norm_node = graph.insert_call_module_before(id, &norm_name, args)?;
            let affine_node = graph.insert_call_module_before(id, &affine_name, vec![norm_node])?;
            let act_node = graph.insert_call_module_before(id, &act_name, vec![affine_node])?;

            graph.replace_all_uses(id, act_node);
            graph.erase_node(id)?;
            graph.delete_module(&name)?;
        }
        Ok(())
    }
}
