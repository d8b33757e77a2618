//! Tests for the graph IR and executor.

use approx::assert_abs_diff_eq;
use ndarray::ArrayD;

use super::*;
use crate::quant::activation::{ActConfig, QuantAct};

fn arr(values: &[f32]) -> ArrayD<f32> {
    ArrayD::from_shape_vec(vec![values.len()], values.to_vec()).unwrap()
}

// ========================================================================
// IR MECHANICS
// ========================================================================

#[test]
fn test_users_and_replace_all_uses() {
    let mut g = Graph::new();
    let a = g.add_input();
    let b = g.add_input();
    let sum = g.add_call(OpTarget::Add, vec![a, b]);
    let prod = g.add_call(OpTarget::Mul, vec![a, sum]);
    g.set_output(prod);

    assert_eq!(g.users(a), vec![sum, prod]);
    assert_eq!(g.users(sum), vec![prod]);

    let c = g.add_input();
    g.replace_all_uses(a, c);
    assert!(g.users(a).is_empty());
    assert_eq!(g.node(sum).args, vec![c, b]);
}

#[test]
fn test_erase_refuses_while_in_use() {
    let mut g = Graph::new();
    let a = g.add_input();
    let relu = g.add_call(OpTarget::Relu, vec![a]);
    g.set_output(relu);

    assert!(g.erase_node(a).is_err());
    assert!(g.erase_node(relu).is_err()); // output marker counts as a use
}

#[test]
fn test_eliminate_dead_keeps_reachable() {
    let mut g = Graph::new();
    let a = g.add_input();
    let live = g.add_call(OpTarget::Relu, vec![a]);
    let _dead = g.add_call(OpTarget::Relu, vec![a]);
    g.set_output(live);

    let removed = g.eliminate_dead().unwrap();
    assert_eq!(removed, 1);
    assert_eq!(g.len(), 2);
}

#[test]
fn test_insert_before_preserves_order() {
    let mut g = Graph::new();
    let a = g.add_input();
    let relu = g.add_call(OpTarget::Relu, vec![a]);
    g.set_output(relu);

    g.add_module(
        "act",
        GraphModule::Act(QuantAct::new(ActConfig::signed(256)).unwrap()),
    )
    .unwrap();
    let act = g.insert_call_module_before(relu, "act", vec![a]).unwrap();

    let ids = g.order_ids();
    let pos_act = ids.iter().position(|&i| i == act).unwrap();
    let pos_relu = ids.iter().position(|&i| i == relu).unwrap();
    assert!(pos_act < pos_relu);
}

#[test]
fn test_duplicate_module_rejected() {
    let mut g = Graph::new();
    g.add_module(
        "m",
        GraphModule::Act(QuantAct::new(ActConfig::signed(256)).unwrap()),
    )
    .unwrap();
    assert!(g
        .add_module(
            "m",
            GraphModule::Act(QuantAct::new(ActConfig::signed(256)).unwrap()),
        )
        .is_err());
}

#[test]
fn test_call_module_requires_registration() {
    let mut g = Graph::new();
    let a = g.add_input();
    assert!(g.add_call_module("ghost", vec![a]).is_err());
}

// ========================================================================
// EXECUTION
// ========================================================================

#[test]
fn test_forward_builtin_chain() {
    let mut g = Graph::new();
    let a = g.add_input();
    let b = g.add_input();
    let sum = g.add_call(OpTarget::Add, vec![a, b]);
    let relu = g.add_call(OpTarget::Relu, vec![sum]);
    g.set_output(relu);

    let y = g.forward(&[arr(&[-3.0, 1.0]), arr(&[1.0, 1.0])]).unwrap();
    assert_abs_diff_eq!(y[[0]], 0.0);
    assert_abs_diff_eq!(y[[1]], 2.0);
}

#[test]
fn test_forward_concat_and_stack() {
    let mut g = Graph::new();
    let a = g.add_input();
    let b = g.add_input();
    let cat = g.add_call(OpTarget::Concat { dim: 0 }, vec![a, b]);
    g.set_output(cat);
    let y = g.forward(&[arr(&[1.0]), arr(&[2.0, 3.0])]).unwrap();
    assert_eq!(y.shape(), &[3]);

    let mut g = Graph::new();
    let a = g.add_input();
    let b = g.add_input();
    let st = g.add_call(OpTarget::Stack { dim: 0 }, vec![a, b]);
    g.set_output(st);
    let y = g.forward(&[arr(&[1.0, 2.0]), arr(&[3.0, 4.0])]).unwrap();
    assert_eq!(y.shape(), &[2, 2]);
}

#[test]
fn test_forward_module_call_mutates_state() {
    let mut g = Graph::new();
    let a = g.add_input();
    g.add_module(
        "act",
        GraphModule::Act(QuantAct::new(ActConfig::signed(256)).unwrap()),
    )
    .unwrap();
    let act = g.add_call_module("act", vec![a]).unwrap();
    g.set_output(act);

    g.forward(&[arr(&[4.0, -4.0])]).unwrap();
    let GraphModule::Act(act) = g.module("act").unwrap() else {
        panic!("module kind changed");
    };
    // statistics were collected during execution
    assert_abs_diff_eq!(act.stats().max(), 4.0);
    assert_abs_diff_eq!(act.stats().min(), -4.0);
}

#[test]
fn test_forward_arity_checked() {
    let mut g = Graph::new();
    let a = g.add_input();
    g.set_output(a);
    assert!(g.forward(&[]).is_err());
}

#[test]
fn test_forward_without_output_fails() {
    let mut g = Graph::new();
    g.add_input();
    assert!(g.forward(&[arr(&[1.0])]).is_err());
}

#[test]
fn test_wrapped_module_forwards_inner_graph() {
    let mut inner = Graph::new();
    let a = inner.add_input();
    let relu = inner.add_call(OpTarget::Relu, vec![a]);
    inner.set_output(relu);

    let mut g = Graph::new();
    let x = g.add_input();
    g.add_module("wrap", GraphModule::Wrapped(Wrapped::new(inner, 256).unwrap()))
        .unwrap();
    let call = g.add_call_module("wrap", vec![x]).unwrap();
    g.set_output(call);

    let y = g.forward(&[arr(&[-1.0, 2.0])]).unwrap();
    assert_abs_diff_eq!(y[[0]], 0.0);
    assert_abs_diff_eq!(y[[1]], 2.0);
}
