//! Tests for the activation quantizer lifecycle.

use approx::assert_abs_diff_eq;
use ndarray::ArrayD;

use super::*;

fn arr(values: &[f32]) -> ArrayD<f32> {
    ArrayD::from_shape_vec(vec![values.len()], values.to_vec()).unwrap()
}

// ========================================================================
// STATE MACHINE
// ========================================================================

#[test]
fn test_collecting_mode_passes_through_and_tracks_stats() {
    let mut act = QuantAct::new(ActConfig::signed(256)).unwrap();
    assert!(!act.started());

    let x = arr(&[-1.5, 0.5, 2.5]);
    let y = act.forward(&x).unwrap();
    // identity nonlinearity: unquantized pass-through
    for (a, b) in x.iter().zip(y.iter()) {
        assert_abs_diff_eq!(a, b);
    }
    assert_abs_diff_eq!(act.stats().max(), 2.5);
    assert_abs_diff_eq!(act.stats().min(), -1.5);
    assert_eq!(act.stats().batches(), 1);
}

#[test]
fn test_relu_applied_while_collecting() {
    let mut act = QuantAct::new(ActConfig::unsigned(256)).unwrap();
    let y = act.forward(&arr(&[-2.0, 3.0])).unwrap();
    assert_abs_diff_eq!(y[[0]], 0.0);
    assert_abs_diff_eq!(y[[1]], 3.0);
}

#[test]
fn test_start_max_init_signed() {
    let mut act = QuantAct::new(ActConfig::signed(256)).unwrap();
    act.forward(&arr(&[-2.0, 1.0])).unwrap();
    act.start();
    assert!(act.started());

    let (lo, hi) = act.clip_bounds();
    assert_abs_diff_eq!(lo, -2.0);
    // symmetric upper bound is derived, one step short of |lo|
    assert_abs_diff_eq!(hi, 2.0 * 254.0 / 256.0);
    assert_abs_diff_eq!(act.eps(), 4.0 / 256.0, epsilon = 1e-6);
}

#[test]
fn test_start_max_init_unsigned() {
    let mut act = QuantAct::new(ActConfig::unsigned(256)).unwrap();
    act.forward(&arr(&[0.5, 5.1])).unwrap();
    act.start();
    let (lo, hi) = act.clip_bounds();
    assert_abs_diff_eq!(lo, 0.0);
    assert_abs_diff_eq!(hi, 5.1);
}

#[test]
fn test_start_std_init_uses_spread() {
    let mut cfg = ActConfig::unsigned(256);
    cfg.init_clip = ClipInit::Std;
    cfg.nb_std = 2.0;
    let mut act = QuantAct::new(cfg).unwrap();
    act.forward(&arr(&[1.0, 1.0, 1.0, 1.0])).unwrap();
    act.start();
    let (_, hi) = act.clip_bounds();
    // EMA mean after one batch of ones is 0.1; variance EMA stays near
    // its initialization, so the bound is mean + 2*std
    assert!(hi > 0.0);
    assert!(hi.is_finite());
}

#[test]
fn test_started_forward_quantizes() {
    let mut act = QuantAct::new(ActConfig::unsigned(256)).unwrap();
    act.forward(&arr(&[0.0, 255.0])).unwrap();
    act.start();
    // eps = 1.0 on [0, 255]
    let y = act.forward(&arr(&[130.4, 300.0, -4.0])).unwrap();
    assert_abs_diff_eq!(y[[0]], 130.0);
    assert_abs_diff_eq!(y[[1]], 255.0);
    assert_abs_diff_eq!(y[[2]], 0.0);
}

#[test]
fn test_invalid_tqt_combination_rejected_at_construction() {
    let mut cfg = ActConfig::signed(256);
    cfg.tqt = true;
    cfg.learn_clip = false;
    assert!(QuantAct::new(cfg).is_err());

    let mut cfg = ActConfig::signed(256);
    cfg.tqt = true;
    cfg.noisy = true;
    assert!(QuantAct::new(cfg).is_err());
}

#[test]
fn test_n_levels_too_small_rejected() {
    let mut cfg = ActConfig::signed(256);
    cfg.n_levels = 1;
    assert!(QuantAct::new(cfg).is_err());
}

// ========================================================================
// BOUND MANAGEMENT
// ========================================================================

#[test]
fn test_set_clip_bounds_overrides() {
    let mut act = QuantAct::new(ActConfig::unsigned(256)).unwrap();
    act.start_from_bounds(0.0, 2.55);
    assert!(act.started());
    assert_abs_diff_eq!(act.eps(), 0.01, epsilon = 1e-7);
}

#[test]
fn test_symm_flag_switches_bound_derivation() {
    let mut act = QuantAct::new(ActConfig::signed(256)).unwrap();
    act.start_from_bounds(-1.0, 1.0);
    // symmetric: upper bound derived from lo
    let (_, hi) = act.clip_bounds();
    assert_abs_diff_eq!(hi, 254.0 / 256.0);

    act.set_symm(false);
    let (_, hi) = act.clip_bounds();
    assert_abs_diff_eq!(hi, 1.0);
}

#[test]
fn test_backward_in_pact_mode() {
    let mut act = QuantAct::new(ActConfig::signed(256)).unwrap();
    act.start_from_bounds(-1.0, 1.0);
    let x = arr(&[-5.0, 0.0, 5.0]);
    let y = act.forward(&x).unwrap();
    let grad = arr(&[1.0, 1.0, 1.0]);
    let g = act.backward(&grad, &x, &y);
    assert_abs_diff_eq!(g.dx[[0]], 0.0);
    assert_abs_diff_eq!(g.dx[[1]], 1.0);
    assert_abs_diff_eq!(g.dx[[2]], 0.0);
    // symmetric signed mode trains the lower bound only
    assert_abs_diff_eq!(g.dclip_lo, 1.0);
    assert_abs_diff_eq!(g.dclip_hi, 0.0);
}

#[test]
fn test_config_serde_round_trip() {
    let cfg = ActConfig::unsigned(16);
    let json = serde_json::to_string(&cfg).unwrap();
    let back: ActConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back.n_levels, 16);
    assert!(!back.signed);
    assert_eq!(back.act_kind, ActKind::Relu);
}

#[test]
fn test_tqt_mode_forward_and_backward() {
    let mut cfg = ActConfig::signed(256);
    cfg.tqt = true;
    let mut act = QuantAct::new(cfg).unwrap();
    act.forward(&arr(&[-2.0, 2.0])).unwrap();
    act.start();

    // log_t initialized from the max-derived bound
    let (lo, hi) = act.clip_bounds();
    assert!(lo < 0.0 && hi > 0.0);

    let x = arr(&[0.5, -0.5]);
    let y = act.forward(&x).unwrap();
    let g = act.backward(&arr(&[1.0, 1.0]), &x, &y);
    assert!(g.dlog_t.is_finite());
    assert_abs_diff_eq!(g.dclip_lo, 0.0);
}
