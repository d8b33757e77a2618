//! Tests for the float modules.

use approx::assert_abs_diff_eq;
use ndarray::{arr1, arr2, Array3, Array4, ArrayD};

use super::*;

fn input(values: &[f32], shape: &[usize]) -> ArrayD<f32> {
    ArrayD::from_shape_vec(shape.to_vec(), values.to_vec()).unwrap()
}

#[test]
fn test_linear_forward_with_bias() {
    let linear = Linear::new(arr2(&[[1.0, 2.0], [0.5, -0.5]]), Some(arr1(&[1.0, -1.0])));
    let y = linear.forward(&input(&[1.0, 1.0], &[1, 2])).unwrap();
    assert_abs_diff_eq!(y[[0, 0]], 4.0);
    assert_abs_diff_eq!(y[[0, 1]], -1.0);
}

#[test]
fn test_linear_shape_mismatch() {
    let linear = Linear::new(arr2(&[[1.0, 2.0]]), None);
    assert!(linear.forward(&input(&[1.0], &[1, 1])).is_err());
}

#[test]
fn test_conv1d_valid_padding() {
    let weight = Array3::from_shape_vec((1, 1, 2), vec![1.0, -1.0]).unwrap();
    let conv = Conv1d::new(weight, None);
    let y = conv.forward(&input(&[1.0, 3.0, 6.0], &[1, 1, 3])).unwrap();
    assert_eq!(y.shape(), &[1, 1, 2]);
    assert_abs_diff_eq!(y[[0, 0, 0]], -2.0);
    assert_abs_diff_eq!(y[[0, 0, 1]], -3.0);
}

#[test]
fn test_conv1d_with_padding_and_stride() {
    let weight = Array3::from_shape_vec((1, 1, 3), vec![1.0, 1.0, 1.0]).unwrap();
    let conv = Conv1d {
        weight,
        bias: Some(arr1(&[10.0])),
        stride: 2,
        padding: 1,
        dilation: 1,
        groups: 1,
    };
    let y = conv.forward(&input(&[1.0, 2.0, 3.0, 4.0], &[1, 1, 4])).unwrap();
    // positions: [pad 1 2], [2 3 4] -> sums + bias
    assert_eq!(y.shape(), &[1, 1, 2]);
    assert_abs_diff_eq!(y[[0, 0, 0]], 13.0);
    assert_abs_diff_eq!(y[[0, 0, 1]], 19.0);
}

#[test]
fn test_conv2d_identity_kernel() {
    let weight = Array4::from_shape_vec((1, 1, 1, 1), vec![2.0]).unwrap();
    let conv = Conv2d::new(weight, None);
    let y = conv
        .forward(&input(&[1.0, 2.0, 3.0, 4.0], &[1, 1, 2, 2]))
        .unwrap();
    assert_eq!(y.shape(), &[1, 1, 2, 2]);
    assert_abs_diff_eq!(y[[0, 0, 1, 1]], 8.0);
}

#[test]
fn test_batchnorm_inference_transform() {
    let bn = BatchNorm::new(
        arr1(&[2.0]),
        arr1(&[1.0]),
        arr1(&[0.5]),
        arr1(&[1.0 - 1e-5]),
    );
    let y = bn.forward(&input(&[1.5], &[1, 1])).unwrap();
    // (1.5 - 0.5)/1 * 2 + 1
    assert_abs_diff_eq!(y[[0, 0]], 3.0, epsilon = 1e-4);
}

#[test]
fn test_normalize_zero_mean_unit_var() {
    let norm = Normalize::new();
    let y = norm.forward(&input(&[1.0, 3.0], &[1, 2])).unwrap();
    let mean: f32 = y.iter().sum::<f32>() / 2.0;
    assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-5);
    assert!(y[[0, 0]] < 0.0 && y[[0, 1]] > 0.0);
}

#[test]
fn test_affine_scales_last_axis() {
    let affine = Affine::new(arr1(&[2.0, 3.0]), arr1(&[0.0, 1.0]));
    let y = affine.forward(&input(&[1.0, 1.0, 2.0, 2.0], &[2, 2])).unwrap();
    assert_abs_diff_eq!(y[[0, 0]], 2.0);
    assert_abs_diff_eq!(y[[0, 1]], 4.0);
    assert_abs_diff_eq!(y[[1, 0]], 4.0);
    assert_abs_diff_eq!(y[[1, 1]], 7.0);
}
