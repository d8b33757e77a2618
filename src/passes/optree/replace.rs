//! Generic tree-replacement pass.

use tracing::debug;

use crate::error::Result;
use crate::graph::{Graph, GraphModule, MetaTable};
use crate::passes::GraphPass;

use super::discover::{discover_trees, TreeSpec};
use super::tree::OpTree;

/// Builds the replacement module for a discovered tree, or declines.
pub type ReplacementFn = Box<dyn Fn(&OpTree, &Graph) -> Result<Option<GraphModule>>>;

/// Replaces every discovered operation tree with a fused module call.
///
/// For each tree (in emission order) the replacement function either
/// declines (`None`, the subgraph is left untouched) or supplies a
/// module; the pass then performs one atomic splice: register the
/// module, insert a call node with the tree's external arguments before
/// the tree's end node, redirect the end node's consumers, and erase
/// every member node. Discovery runs to completion before any splice, so
/// the traversal never observes a mutating graph.
pub struct TreeReplacePass {
    spec: TreeSpec,
    label: &'static str,
    always_terminate: bool,
    replacement: ReplacementFn,
}

impl TreeReplacePass {
    /// Build a pass replacing trees matching `spec`.
    pub fn new(
        spec: TreeSpec,
        label: &'static str,
        always_terminate: bool,
        replacement: ReplacementFn,
    ) -> Self {
        Self {
            spec,
            label,
            always_terminate,
            replacement,
        }
    }
}

impl GraphPass for TreeReplacePass {
    fn name(&self) -> &'static str {
        self.label
    }

    fn run(&self, graph: &mut Graph, _meta: &mut MetaTable) -> Result<()> {
        let trees = discover_trees(graph, &self.spec, self.always_terminate)?;
        debug!(pass = self.label, trees = trees.len(), "trees discovered");

        for (i, tree) in trees.iter().enumerate() {
            let Some(module) = (self.replacement)(tree, graph)? else {
                continue;
            };
            let target = format!("{}_tree_{}", self.label, i);
            graph.add_module(&target, module)?;
            // re-read the member edges: an upstream tree's splice may have
            // redirected them since discovery
            let args = tree.external_args(graph);
            let new_node = graph.insert_call_module_before(tree.end(), &target, args)?;
            graph.replace_all_uses(tree.end(), new_node);
            for &node in tree.nodes() {
                graph.erase_node(node)?;
            }
        }
        Ok(())
    }
}
