//! Packing accuracy: per-element reconstruction bounds and table semantics

use super::helpers::*;
use lutr::quant::{QuantizedWeight, TableMode};
use lutr::{DequantOps, Matrix};
use proptest::prelude::*;

/// Largest distance between adjacent table entries.
fn max_gap(q: &QuantizedWeight) -> f32 {
    let mut v = q.table().values().to_vec();
    v.sort_by(|a, b| a.total_cmp(b));
    v.windows(2).map(|w| w[1] - w[0]).fold(0.0, f32::max)
}

fn mode_strategy() -> impl Strategy<Value = TableMode> {
    prop_oneof![
        Just(TableMode::IntUniform),
        Just(TableMode::FpLike),
        Just(TableMode::NormalFloat),
        Just(TableMode::NormalFloatCalibrated { sigma: None }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn reconstruction_within_half_gap(
        data in prop::collection::vec(-4.0f32..4.0, 2 * 64),
        bits in 2u32..=4,
        mode in mode_strategy(),
    ) {
        let dense = Matrix::from_vec(data.clone(), 2, 64).unwrap();
        let q = lutr::pack(&dense, bits, 32, mode).unwrap();
        let deq = q.dequantize();
        let half_gap = max_gap(&q) / 2.0;
        for (i, (&w, &d)) in data.iter().zip(&deq).enumerate() {
            let scale = q.scales()[i / 32];
            let bound = half_gap * scale * (1.0 + 1e-5) + 1e-6;
            prop_assert!((w - d).abs() <= bound, "w={} d={} bound={}", w, d, bound);
        }
    }

    #[test]
    fn codes_stay_in_range(
        data in prop::collection::vec(-1.0f32..1.0, 4 * 32),
        bits in 2u32..=4,
    ) {
        let dense = Matrix::from_vec(data, 4, 32).unwrap();
        let q = lutr::pack(&dense, bits, 32, TableMode::NormalFloat).unwrap();
        prop_assert!(q.codes().unpack().iter().all(|&c| (c as usize) < (1 << bits)));
    }
}

#[test]
fn test_int_uniform_matches_affine_quantizer() {
    let (n, k, gs) = (8, 256, 64);
    for bits in [2u32, 3, 4] {
        let q = det_weight(n, k, bits, gs, TableMode::IntUniform);
        let dense = det_data(n * k, 7);
        let lo = -((1 << (bits - 1)) as f32);
        let hi = ((1 << (bits - 1)) - 1) as f32;
        let deq = q.dequantize();
        for (i, (&w, &d)) in dense.iter().zip(&deq).enumerate() {
            let scale = q.scales()[i / gs];
            let expect = (w / scale).round().clamp(lo, hi) * scale;
            assert_eq!(d, expect, "bits={bits} index={i}");
        }
    }
}

#[test]
fn test_half_step_ties_round_down() {
    // 4-bit int: max 7 and min -7.5 both give scale 1, so w/scale hits .5 exactly
    let mut w = vec![0.0f32; 64];
    w[..6].copy_from_slice(&[7.0, 2.5, -2.5, -7.5, 0.5, -0.5]);
    let q = lutr::pack(&Matrix::from_vec(w, 1, 64).unwrap(), 4, 64, TableMode::IntUniform).unwrap();
    assert_eq!(q.scales(), &[1.0]);
    assert_eq!(&q.dequantize()[..6], &[7.0, 2.0, -3.0, -8.0, 0.0, -1.0]);
}

#[test]
fn test_error_shrinks_with_bits() {
    let (n, k) = (16, 256);
    let dense = det_data(n * k, 7);
    for mode in [TableMode::IntUniform, TableMode::NormalFloat] {
        let errs: Vec<f32> = [2u32, 3, 4]
            .iter()
            .map(|&bits| {
                let deq = det_weight(n, k, bits, 64, mode).dequantize();
                dense.iter().zip(&deq).map(|(w, d)| (w - d).abs()).sum::<f32>() / dense.len() as f32
            })
            .collect();
        assert!(errs[0] > errs[1] && errs[1] > errs[2], "{mode}: {errs:?}");
    }
}

#[test]
fn test_zero_group_packs_to_zero() {
    let mut data = det_data(2 * 64, 3);
    data[..32].iter_mut().for_each(|v| *v = 0.0);
    let q = lutr::pack(&Matrix::from_vec(data, 2, 64).unwrap(), 3, 32, TableMode::FpLike).unwrap();
    assert_eq!(q.scales()[0], 0.0);
    assert!(q.dequantize()[..32].iter().all(|&v| v == 0.0));
}

#[test]
fn test_calibrated_mode_records_sigma() {
    let q = det_weight(8, 128, 3, 32, TableMode::NormalFloatCalibrated { sigma: None });
    match q.table().mode() {
        TableMode::NormalFloatCalibrated { sigma: Some(s) } => assert!(s > 0.0 && s <= 1.0),
        other => panic!("unexpected mode {other}"),
    }
    let max = q.table().values().iter().fold(0.0f32, |m, v| m.max(v.abs()));
    assert!((max - 1.0).abs() < 1e-6);
}

#[test]
fn test_client_dequantize_matches_reference() {
    let client = setup_cpu();
    let q = det_weight(32, 128, 4, 32, TableMode::FpLike);
    let dense: Matrix<f32> = client.dequantize(&q).unwrap();
    assert_eq!(dense.as_slice(), q.dequantize().as_slice());

    #[cfg(feature = "cuda")]
    with_cuda_backend(|cuda| {
        let on_device: Matrix<f32> = cuda.dequantize(&q).unwrap();
        assert_parity_f32_tol(on_device.as_slice(), dense.as_slice(), "dequantize", 0.0, 0.0);
    });
}
