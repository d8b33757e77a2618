//! Tests for epsilon reconciliation in composite ops.

use approx::assert_abs_diff_eq;
use ndarray::ArrayD;

use super::*;
use crate::quant::activation::ActConfig;

fn arr(values: &[f32]) -> ArrayD<f32> {
    ArrayD::from_shape_vec(vec![values.len()], values.to_vec()).unwrap()
}

// ========================================================================
// EPSILON RECONCILIATION
// ========================================================================

#[test]
fn test_reassign_epsilons_widest_range_wins() {
    let mut add = QuantAdd::new(3, ActConfig::signed(256), false).unwrap();
    add.acts_mut()[0].start_from_bounds(-1.0, 1.0);
    add.acts_mut()[1].start_from_bounds(-2.0, 2.0);
    add.acts_mut()[2].start_from_bounds(-0.5, 0.5);
    add.act_out_mut().start_from_bounds(-1.0, 1.0);

    // widest input: lo=-2, derived hi=2*254/256, width = 2*510/256
    let widest_eps = (2.0 * 254.0 / 256.0 + 2.0) / 255.0;

    add.reassign_epsilons();

    for act in add.acts() {
        assert_abs_diff_eq!(act.eps(), widest_eps, epsilon = 1e-6);
        let (lo, hi) = act.clip_bounds();
        // reassigned ranges stay grid-aligned
        let steps = (hi - lo) / act.eps();
        assert_abs_diff_eq!(steps, steps.round(), epsilon = 1e-3);
        // all three inputs are meaningfully signed, so placement is
        // signed-symmetric
        assert_abs_diff_eq!(lo, -128.0 * widest_eps, epsilon = 1e-5);
        assert_abs_diff_eq!(hi, 127.0 * widest_eps, epsilon = 1e-5);
    }
}

#[test]
fn test_reassign_epsilons_unsigned_placement() {
    let mut add = QuantAdd::new(2, ActConfig::unsigned(256), false).unwrap();
    add.acts_mut()[0].start_from_bounds(0.0, 1.0);
    add.acts_mut()[1].start_from_bounds(0.0, 3.0);
    add.act_out_mut().start_from_bounds(0.0, 4.0);

    add.reassign_epsilons();

    let eps = 3.0 / 255.0;
    for act in add.acts() {
        assert_abs_diff_eq!(act.eps(), eps, epsilon = 1e-6);
        let (lo, hi) = act.clip_bounds();
        assert_abs_diff_eq!(lo, 0.0);
        assert_abs_diff_eq!(hi, 255.0 * eps, epsilon = 1e-5);
    }
}

#[test]
fn test_forced_mode_copies_output_range() {
    let mut add = QuantAdd::new(2, ActConfig::unsigned(256), true).unwrap();
    add.acts_mut()[0].start_from_bounds(0.0, 1.0);
    add.acts_mut()[1].start_from_bounds(0.0, 9.0);
    add.act_out_mut().start_from_bounds(0.0, 5.0);

    add.reassign_epsilons();

    for act in add.acts() {
        let (lo, hi) = act.clip_bounds();
        assert_abs_diff_eq!(lo, 0.0);
        assert_abs_diff_eq!(hi, 5.0);
    }
}

#[test]
fn test_policy_half_range_threshold() {
    let policy = SignednessPolicy::HalfRangeThreshold;
    let mut act = crate::quant::activation::QuantAct::new(ActConfig::unsigned(256)).unwrap();
    act.start_from_bounds(0.0, 2.0);
    // |0| < 2/2 -> unsigned
    assert!(policy.is_unsigned(&act));
}

// ========================================================================
// FORWARD
// ========================================================================

#[test]
fn test_add_forward_sums_on_common_grid() {
    let mut add = QuantAdd::new(2, ActConfig::unsigned(256), false).unwrap();
    add.acts_mut()[0].start_from_bounds(0.0, 255.0);
    add.acts_mut()[1].start_from_bounds(0.0, 255.0);
    add.act_out_mut().start_from_bounds(0.0, 255.0);

    let y = add
        .forward(&[arr(&[1.0, 2.0]), arr(&[3.5, 4.0])])
        .unwrap();
    // eps = 1: inputs floor to the integer grid before summing
    assert_abs_diff_eq!(y[[0]], 4.0);
    assert_abs_diff_eq!(y[[1]], 6.0);
}

#[test]
fn test_add_rejects_wrong_arity() {
    let mut add = QuantAdd::new(2, ActConfig::unsigned(256), false).unwrap();
    assert!(add.forward(&[arr(&[1.0])]).is_err());
}

#[test]
fn test_concat_forward_and_stack() {
    let mut cat = QuantConcat::new(2, 0, false, ActConfig::unsigned(256)).unwrap();
    let y = cat.forward(&[arr(&[1.0, 2.0]), arr(&[3.0])]).unwrap();
    assert_eq!(y.shape(), &[3]);

    let mut stack = QuantConcat::new(2, 0, true, ActConfig::unsigned(256)).unwrap();
    let y = stack.forward(&[arr(&[1.0, 2.0]), arr(&[3.0, 4.0])]).unwrap();
    assert_eq!(y.shape(), &[2, 2]);
}

#[test]
fn test_concat_reassign_epsilons_aligns_inputs() {
    let mut cat = QuantConcat::new(2, 0, false, ActConfig::unsigned(256)).unwrap();
    cat.acts_mut()[0].start_from_bounds(0.0, 1.0);
    cat.acts_mut()[1].start_from_bounds(0.0, 2.0);
    cat.reassign_epsilons();
    assert_abs_diff_eq!(cat.acts()[0].eps(), cat.acts()[1].eps(), epsilon = 1e-7);
}

#[test]
fn test_matmul_eps_product_and_forward() {
    let mm = QuantMatmul::new();
    assert_abs_diff_eq!(mm.eps_out(0.5, 0.25), 0.125);

    let a = ArrayD::from_shape_vec(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    let b = ArrayD::from_shape_vec(vec![2, 1], vec![1.0, 1.0]).unwrap();
    let y = mm.forward(&a, &b).unwrap();
    assert_eq!(y.shape(), &[2, 1]);
    assert_abs_diff_eq!(y[[0, 0]], 3.0);
    assert_abs_diff_eq!(y[[1, 0]], 7.0);
}

#[test]
fn test_matmul_shape_mismatch() {
    let mm = QuantMatmul::new();
    let a = ArrayD::from_shape_vec(vec![2, 3], vec![0.0; 6]).unwrap();
    let b = ArrayD::from_shape_vec(vec![2, 2], vec![0.0; 4]).unwrap();
    assert!(mm.forward(&a, &b).is_err());
}
