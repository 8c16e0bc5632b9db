//! Persisted weights reload bit-identically and compute identically

use super::helpers::*;
use half::f16;
use lutr::quant::serialize::{from_bytes, load, save, to_bytes};
use lutr::quant::{LutMatmulOps, MatmulOptions, TableMode};
use lutr::{Error, Matrix};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn reload_is_bit_identical(
        data in prop::collection::vec(-2.0f32..2.0, 3 * 128),
        bits in 2u32..=4,
        gs in prop::sample::select(vec![32usize, 64, 128]),
        calibrated in any::<bool>(),
    ) {
        let mode = if calibrated {
            TableMode::NormalFloatCalibrated { sigma: None }
        } else {
            TableMode::FpLike
        };
        let q = lutr::pack(&Matrix::from_vec(data, 3, 128).unwrap(), bits, gs, mode).unwrap();
        let back = from_bytes(&to_bytes(&q).unwrap()).unwrap();
        prop_assert_eq!(back.codes().words(), q.codes().words());
        prop_assert_eq!(
            back.scales().iter().map(|s| s.to_bits()).collect::<Vec<_>>(),
            q.scales().iter().map(|s| s.to_bits()).collect::<Vec<_>>()
        );
        prop_assert_eq!(back.table(), q.table());
        prop_assert_eq!(back, q);
    }
}

#[test]
fn test_file_round_trip_gives_identical_matmul() {
    let client = setup_cpu();
    let q = det_weight(128, 256, 3, 64, TableMode::NormalFloatCalibrated { sigma: None });
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("layer.safetensors");
    save(&q, &path).unwrap();
    let back = load(&path).unwrap();

    let a = det_matrix::<f16>(8, 256, 1);
    let opts = MatmulOptions::default();
    assert_eq!(
        client.lut_matmul(&a, &back, &opts).unwrap(),
        client.lut_matmul(&a, &q, &opts).unwrap()
    );
}

#[test]
fn test_corrupt_files_are_format_errors() {
    let q = det_weight(4, 64, 4, 32, TableMode::IntUniform);
    let bytes = to_bytes(&q).unwrap();

    assert!(matches!(from_bytes(&bytes[..4]), Err(Error::FormatError { .. })));
    assert!(matches!(
        from_bytes(&bytes[..bytes.len() - 4]),
        Err(Error::FormatError { .. })
    ));

    let mut bad_header = bytes.clone();
    bad_header[8] = b'[';
    assert!(matches!(from_bytes(&bad_header), Err(Error::FormatError { .. })));
}

/// Re-encode an artifact after editing its JSON header.
fn rewrite_header(bytes: &[u8], edit: impl FnOnce(&mut serde_json::Value)) -> Vec<u8> {
    let len = u64::from_le_bytes(bytes[..8].try_into().unwrap()) as usize;
    let mut header: serde_json::Value =
        serde_json::from_slice(bytes[8..8 + len].trim_ascii_end()).unwrap();
    edit(&mut header);
    let header = serde_json::to_vec(&header).unwrap();
    let mut out = (header.len() as u64).to_le_bytes().to_vec();
    out.extend_from_slice(&header);
    out.extend_from_slice(&bytes[8 + len..]);
    out
}

#[test]
fn test_rewritten_header_still_loads() {
    let q = det_weight(4, 64, 4, 32, TableMode::IntUniform);
    let bytes = rewrite_header(&to_bytes(&q).unwrap(), |_| {});
    assert_eq!(from_bytes(&bytes).unwrap(), q);
}

#[test]
fn test_oversized_shapes_are_format_errors() {
    let q = det_weight(4, 64, 4, 32, TableMode::IntUniform);
    let bytes = to_bytes(&q).unwrap();

    let huge = rewrite_header(&bytes, |h| {
        h["scales"]["shape"] = serde_json::json!([1u64 << 40, 1u64 << 40]);
    });
    assert!(matches!(from_bytes(&huge), Err(Error::FormatError { .. })));

    let huge_rows = rewrite_header(&bytes, |h| {
        h["__metadata__"]["rows"] = serde_json::json!((usize::MAX / 2).to_string());
        h["__metadata__"]["cols"] = serde_json::json!("64");
    });
    assert!(matches!(from_bytes(&huge_rows), Err(Error::FormatError { .. })));
}

#[test]
fn test_bit_width_does_not_wrap() {
    let q = det_weight(4, 64, 4, 32, TableMode::IntUniform);
    let bytes = rewrite_header(&to_bytes(&q).unwrap(), |h| {
        h["__metadata__"]["bits"] = serde_json::json!(((1u64 << 32) + 4).to_string());
    });
    assert!(matches!(from_bytes(&bytes), Err(Error::FormatError { .. })));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        load(dir.path().join("absent.safetensors")),
        Err(Error::Io(_))
    ));
}
