//! Merging adjacent requantization nodes.

use tracing::debug;

use crate::error::Result;
use crate::graph::{Graph, GraphModule, MetaTable, NodeId, NodeOp};
use crate::passes::GraphPass;
use crate::quant::requant::try_merge;

/// Folds directly cascaded requantization operators into one.
///
/// Matches pairs of module-call nodes where the second's only input is
/// the first and both modules are requants. Compatible pairs (same
/// convention and signedness, provably bit-exact fusion) are folded;
/// incompatible pairs are left in place — declining is a no-op, not a
/// failure. Runs to a fixpoint so chains longer than two collapse fully.
pub struct RequantMergePass;

impl RequantMergePass {
    fn merge_once(&self, graph: &mut Graph) -> Result<usize> {
        let mut changes = 0;
        for first_node in graph.order_ids() {
            let Some(first_name) = requant_name(graph, first_node) else {
                continue;
            };
            let users = graph.users(first_node);
            if users.len() != 1 || graph.output() == Some(first_node) {
                continue;
            }
            let second_node = users[0];
            let Some(second_name) = requant_name(graph, second_node) else {
                continue;
            };
            if graph.node(second_node).args != vec![first_node] {
                continue;
            }

            let merged = {
                let GraphModule::Requant(first) = graph.module(&first_name)? else {
                    continue;
                };
                let GraphModule::Requant(second) = graph.module(&second_name)? else {
                    continue;
                };
                try_merge(first, second)
            };
            let Some(merged) = merged else {
                continue;
            };

            // the merged operator takes the first node's place; the
            // second node is bypassed and erased
            graph.replace_module(&first_name, GraphModule::Requant(merged))?;
            graph.replace_all_uses(second_node, first_node);
            graph.erase_node(second_node)?;
            graph.delete_module(&second_name)?;
            changes += 1;
        }
        Ok(changes)
    }
}

fn requant_name(graph: &Graph, id: NodeId) -> Option<String> {
    match &graph.node(id).op {
        NodeOp::CallModule(name) => {
            matches!(graph.module(name).ok()?, GraphModule::Requant(_)).then(|| name.clone())
        }
        _ => None,
    }
}

impl GraphPass for RequantMergePass {
    fn name(&self) -> &'static str {
        "requant_merge"
    }

    fn run(&self, graph: &mut Graph, _meta: &mut MetaTable) -> Result<()> {
        let mut total = 0;
        loop {
            let changes = self.merge_once(graph)?;
            total += changes;
            if changes == 0 {
                break;
            }
        }
        debug!(merged = total, "requant pairs folded");
        Ok(())
    }
}
