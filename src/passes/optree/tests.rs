//! Tests for operation-tree discovery and replacement.

use approx::assert_abs_diff_eq;
use ndarray::ArrayD;

use super::*;
use crate::graph::{Graph, GraphModule, MetaTable, NodeId, OpKind, OpTarget};
use crate::passes::GraphPass;
use crate::quant::activation::ActConfig;
use crate::quant::composite::QuantAdd;

fn arr(values: &[f32]) -> ArrayD<f32> {
    ArrayD::from_shape_vec(vec![values.len()], values.to_vec()).unwrap()
}

/// A chain of `len` adds, each consuming the previous sum plus one fresh
/// input. Returns the graph and the final add node.
fn add_chain(len: usize) -> (Graph, NodeId) {
    let mut g = Graph::new();
    let first = g.add_input();
    let second = g.add_input();
    let mut acc = g.add_call(OpTarget::Add, vec![first, second]);
    for _ in 1..len {
        let next = g.add_input();
        acc = g.add_call(OpTarget::Add, vec![acc, next]);
    }
    g.set_output(acc);
    (g, acc)
}

// ========================================================================
// DISCOVERY
// ========================================================================

#[test]
fn test_linear_chain_is_one_tree() {
    let (g, end) = add_chain(5);
    let trees = discover_trees(&g, &TreeSpec::new(&[OpKind::Add]), false).unwrap();

    assert_eq!(trees.len(), 1);
    let tree = &trees[0];
    assert_eq!(tree.nodes().len(), 5);
    assert_eq!(tree.open_branches(), 0);
    assert!(tree.is_terminated());
    assert_eq!(tree.end(), end);
    // 6 external inputs feed the chain
    assert_eq!(tree.args().len(), 6);
}

#[test]
fn test_branching_chains_cut_at_multi_consumer_nodes() {
    // two independent 3-node add chains meet in a top add node; the
    // chain ends also feed the (non-matching) output concat, so each has
    // two consumers and is cut from the top tree
    let mut g = Graph::new();
    let mut chain = |g: &mut Graph| {
        let a = g.add_input();
        let b = g.add_input();
        let n1 = g.add_call(OpTarget::Add, vec![a, b]);
        let c = g.add_input();
        let n2 = g.add_call(OpTarget::Add, vec![n1, c]);
        let d = g.add_input();
        g.add_call(OpTarget::Add, vec![n2, d])
    };
    let left = chain(&mut g);
    let right = chain(&mut g);
    let top = g.add_call(OpTarget::Add, vec![left, right]);
    let out = g.add_call(OpTarget::Concat { dim: 0 }, vec![top, left, right]);
    g.set_output(out);

    let trees = discover_trees(&g, &TreeSpec::new(&[OpKind::Add]), false).unwrap();

    assert_eq!(trees.len(), 3);
    let sizes: Vec<usize> = trees.iter().map(|t| t.nodes().len()).collect();
    assert!(sizes.contains(&1), "the top node forms its own tree");
    assert_eq!(sizes.iter().filter(|&&s| s == 3).count(), 2);
    for tree in &trees {
        assert!(tree.is_terminated());
        assert_eq!(tree.open_branches(), 0);
    }
    // an upstream chain resolves before the tree consuming it
    assert_eq!(trees[0].end(), left);
    assert_eq!(trees[1].end(), top);
}

#[test]
fn test_diamond_shared_source_not_re_expanded() {
    // x has two consumers; the second visit must resolve a branch
    // without re-expanding the subtree
    let mut g = Graph::new();
    let i0 = g.add_input();
    let i1 = g.add_input();
    let x = g.add_call(OpTarget::Add, vec![i0, i1]);
    let left = g.add_call(OpTarget::Relu, vec![x]);
    let top = g.add_call(OpTarget::Add, vec![left, x]);
    g.set_output(top);

    let trees = discover_trees(&g, &TreeSpec::new(&[OpKind::Add]), false).unwrap();
    // x is cut from top's tree (two consumers) and forms its own
    assert_eq!(trees.len(), 2);
    for tree in &trees {
        assert!(tree.is_terminated());
    }
    // x's tree is emitted before top's, which consumes its output
    assert_eq!(trees[0].end(), x);
    assert_eq!(trees[1].end(), top);
}

#[test]
fn test_always_terminate_forces_single_node_trees() {
    let (g, _) = add_chain(3);
    let trees = discover_trees(&g, &TreeSpec::new(&[OpKind::Add]), true).unwrap();
    assert_eq!(trees.len(), 3);
    for tree in &trees {
        assert_eq!(tree.nodes().len(), 1);
        assert!(tree.is_terminated());
    }
}

#[test]
fn test_args_first_seen_order() {
    // a2 = add(a1, i2), a1 = add(i0, i1): member args are scanned end
    // node first, so the external order is [i2, i0, i1]
    let mut g = Graph::new();
    let i0 = g.add_input();
    let i1 = g.add_input();
    let a1 = g.add_call(OpTarget::Add, vec![i0, i1]);
    let i2 = g.add_input();
    let a2 = g.add_call(OpTarget::Add, vec![a1, i2]);
    g.set_output(a2);

    let trees = discover_trees(&g, &TreeSpec::new(&[OpKind::Add]), false).unwrap();
    assert_eq!(trees[0].args(), &[i2, i0, i1]);
}

#[test]
fn test_no_matching_nodes_yields_no_trees() {
    let mut g = Graph::new();
    let a = g.add_input();
    let relu = g.add_call(OpTarget::Relu, vec![a]);
    g.set_output(relu);
    let trees = discover_trees(&g, &TreeSpec::new(&[OpKind::Add]), false).unwrap();
    assert!(trees.is_empty());
}

#[test]
fn test_discovery_requires_output() {
    let mut g = Graph::new();
    g.add_input();
    assert!(discover_trees(&g, &TreeSpec::new(&[OpKind::Add]), false).is_err());
}

#[test]
#[should_panic(expected = "no branches")]
fn test_tree_on_leaf_node_is_invariant_violation() {
    let mut g = Graph::new();
    let input = g.add_input();
    g.set_output(input);
    let _ = OpTree::new(&g, input);
}

// ========================================================================
// REPLACEMENT
// ========================================================================

#[test]
fn test_chain_replaced_by_single_fused_module() {
    let (mut g, _) = add_chain(5);
    let pass = TreeReplacePass::new(
        TreeSpec::new(&[OpKind::Add]),
        "add_fuse",
        false,
        Box::new(|tree, _graph| {
            Ok(Some(GraphModule::Add(QuantAdd::new(
                tree.args().len(),
                ActConfig::signed(256),
                false,
            )?)))
        }),
    );
    pass.run(&mut g, &mut MetaTable::new()).unwrap();

    // 6 inputs + 1 fused call remain
    assert_eq!(g.len(), 7);
    // collecting-mode acts are identity, so the fused module still sums
    let inputs: Vec<ArrayD<f32>> = (0..6).map(|i| arr(&[i as f32])).collect();
    let y = g.forward(&inputs).unwrap();
    assert_abs_diff_eq!(y[[0]], 15.0);
}

#[test]
fn test_replacement_fn_can_decline() {
    let (mut g, _) = add_chain(2);
    let before = g.len();
    let pass = TreeReplacePass::new(
        TreeSpec::new(&[OpKind::Add]),
        "noop",
        false,
        Box::new(|_tree, _graph| Ok(None)),
    );
    pass.run(&mut g, &mut MetaTable::new()).unwrap();
    assert_eq!(g.len(), before);
}
