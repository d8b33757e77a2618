//! Operation trees: maximal runs of one operator kind.

use crate::graph::{Graph, NodeId};

/// A maximal contiguous run of graph nodes matching one operator spec,
/// connected in a single-user chain.
///
/// Trees are transient: created during one discovery traversal, consumed
/// by the replacement step, then discarded. The open-branch counter
/// tracks how many upstream edges have not yet been resolved; a tree is
/// complete exactly when it reaches zero.
#[derive(Clone, Debug)]
pub struct OpTree {
    end: NodeId,
    nodes: Vec<NodeId>,
    open_branches: usize,
    users: Vec<NodeId>,
    args: Vec<NodeId>,
}

impl OpTree {
    /// Open a tree rooted at `end`.
    ///
    /// Panics if `end` has no inputs: a tree with zero open branches at
    /// creation indicates a malformed graph or a discovery bug.
    pub fn new(graph: &Graph, end: NodeId) -> Self {
        let open_branches = graph.node(end).args.len();
        assert!(
            open_branches > 0,
            "tried to create an OpTree with no branches"
        );
        Self {
            end,
            nodes: vec![end],
            open_branches,
            // snapshot now: the end node may be erased later and its user
            // edges with it
            users: graph.users(end),
            args: Vec::new(),
        }
    }

    /// Append an interior node to the tree.
    pub fn add_node(&mut self, graph: &Graph, node: NodeId) {
        assert!(
            !self.nodes.contains(&node),
            "tried to add node {node} to the same tree twice"
        );
        assert!(
            !self.is_terminated(),
            "tried to add a node to a terminated tree"
        );
        self.nodes.push(node);
        // interior nodes have exactly one user (inside the tree), so the
        // node consumes one open branch and contributes its own inputs
        self.open_branches += graph.node(node).args.len() - 1;
    }

    /// Resolve one open branch.
    pub fn terminate_branch(&mut self) {
        assert!(
            !self.is_terminated(),
            "tried to terminate a branch of an already-terminated tree"
        );
        self.open_branches -= 1;
    }

    /// Whether every branch has been resolved.
    pub fn is_terminated(&self) -> bool {
        self.open_branches == 0
    }

    /// The tree's terminal (output) node.
    pub fn end(&self) -> NodeId {
        self.end
    }

    /// Member nodes, end node first.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Open branch count.
    pub fn open_branches(&self) -> usize {
        self.open_branches
    }

    /// Consumers of the end node, snapshotted at creation.
    pub fn users(&self) -> &[NodeId] {
        &self.users
    }

    /// External arguments as sealed at emission time: every input of
    /// every member that is not itself a member, in first-seen order.
    /// Duplicates are preserved — they determine the replacement node's
    /// arity.
    pub fn args(&self) -> &[NodeId] {
        &self.args
    }

    /// Recompute the external arguments from the live graph.
    ///
    /// Earlier tree splices may have redirected member argument edges, so
    /// the replacement step reads the current edges rather than the
    /// snapshot taken at emission.
    pub fn external_args(&self, graph: &Graph) -> Vec<NodeId> {
        self.nodes
            .iter()
            .flat_map(|&n| graph.node(n).args.iter().copied())
            .filter(|a| !self.nodes.contains(a))
            .collect()
    }

    /// Compute and store the external argument list.
    pub(crate) fn seal_args(&mut self, graph: &Graph) {
        self.args = self.external_args(graph);
    }
}
