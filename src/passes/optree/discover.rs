//! Operation-tree discovery.

use std::collections::HashSet;

use crate::error::{QuantError, Result};
use crate::graph::{Graph, Node, NodeId, NodeOp, OpKind};

use super::tree::OpTree;

/// Which nodes belong to a tree: built-in calls whose operator kind is in
/// the allow-list.
#[derive(Clone, Debug)]
pub struct TreeSpec {
    kinds: Vec<OpKind>,
}

impl TreeSpec {
    /// Build a spec from the allowed operator kinds.
    pub fn new(kinds: &[OpKind]) -> Self {
        Self {
            kinds: kinds.to_vec(),
        }
    }

    /// Whether `node` matches this spec.
    pub fn matches(&self, node: &Node) -> bool {
        match &node.op {
            NodeOp::Call(target) => self.kinds.contains(&target.kind()),
            _ => false,
        }
    }
}

/// Discover every operation tree in `graph` matching `spec`.
///
/// Deterministic single-threaded depth-first traversal upstream from the
/// graph's output. Trees are emitted in the order their last branch
/// resolves, which guarantees any tree appears before a tree consuming
/// its output — the order epsilon reconciliation downstream depends on.
///
/// With `always_terminate` every matching node closes its own
/// single-node tree; required for non-associative or shape-changing
/// operators (concat, stack) where fusing several nodes is unsafe.
pub fn discover_trees(
    graph: &Graph,
    spec: &TreeSpec,
    always_terminate: bool,
) -> Result<Vec<OpTree>> {
    let output = graph.output().ok_or(QuantError::NoOutput)?;
    let mut discovery = Discovery {
        graph,
        spec,
        always_terminate,
        arena: Vec::new(),
        emitted: Vec::new(),
        seen: HashSet::new(),
    };
    discovery.visit(output, None);

    let Discovery { arena, emitted, .. } = discovery;
    Ok(emitted.into_iter().map(|idx| arena[idx].clone()).collect())
}

struct Discovery<'g, 's> {
    graph: &'g Graph,
    spec: &'s TreeSpec,
    always_terminate: bool,
    arena: Vec<OpTree>,
    emitted: Vec<usize>,
    seen: HashSet<NodeId>,
}

impl Discovery<'_, '_> {
    /// Depth-first visit of `node`, optionally inside the tree `cur`.
    fn visit(&mut self, node: NodeId, cur: Option<usize>) {
        // a node seen before is either already in a tree or never will
        // be; if we arrived here from inside a tree, this edge resolves
        // one of its branches and the traversal stops (DFS over a DAG:
        // diamonds must not be re-expanded)
        if self.seen.contains(&node) {
            if let Some(t) = cur {
                self.resolve_branch(t);
            }
            return;
        }
        self.seen.insert(node);

        let mut cur = cur;
        if self.spec.matches(self.graph.node(node)) {
            let multi_user = self.graph.users(node).len() > 1;
            match cur {
                Some(t) if multi_user || self.always_terminate => {
                    // branching point: cut the current tree here and
                    // start a fresh one rooted at this node
                    self.resolve_branch(t);
                    cur = Some(self.open_tree(node));
                }
                Some(t) => {
                    self.arena[t].add_node(self.graph, node);
                }
                None => {
                    cur = Some(self.open_tree(node));
                }
            }
        } else if let Some(t) = cur {
            // left the tree: one branch resolved, traversal continues
            // outside any tree
            self.resolve_branch(t);
            cur = None;
        }

        for &arg in &self.graph.node(node).args {
            self.visit(arg, cur);
        }
    }

    fn open_tree(&mut self, end: NodeId) -> usize {
        self.arena.push(OpTree::new(self.graph, end));
        self.arena.len() - 1
    }

    fn resolve_branch(&mut self, tree: usize) {
        self.arena[tree].terminate_branch();
        if self.arena[tree].is_terminated() {
            self.arena[tree].seal_args(self.graph);
            self.emitted.push(tree);
        }
    }
}
