//! Registry-driven dispatch through the public API

use super::helpers::*;
use half::{bf16, f16};
use lutr::quant::{ConfigSource, GpuArch, KernelConfig, LutMatmulOps, MatmulOptions, TableMode};
use lutr::{CpuClient, DType, Error, Matrix, RuntimeConfig};

#[test]
fn test_registry_config_equals_explicit_config() {
    let client = setup_cpu();
    let mut keys: Vec<_> = client
        .kernel_registry()
        .keys()
        .filter(|k| k.arch == GpuArch::Host && k.n <= 256 && k.tp == 1 && k.dtype == DType::F16)
        .copied()
        .collect();
    keys.sort_by_key(|k| (k.bits.bits(), k.group_size.get(), k.m, k.n));
    assert!(!keys.is_empty());

    for key in keys.iter().step_by(5) {
        let q = det_weight(key.n, key.k, key.bits.bits(), key.group_size.get(), TableMode::NormalFloat);
        let a = det_matrix::<f16>(key.m, key.k, 3);
        let tuned = client.lut_matmul(&a, &q, &MatmulOptions::default()).unwrap();
        let config = client.kernel_registry().lookup(key).unwrap().config;
        let explicit = client
            .lut_matmul(&a, &q, &MatmulOptions::default().with_config(config))
            .unwrap();
        if config.is_split() {
            assert_parity_f32_tol(&tuned.to_f32_vec(), &explicit.to_f32_vec(), "split", 2e-3, 1e-3);
        } else {
            assert_eq!(tuned, explicit, "{key}");
        }
    }
}

#[test]
fn test_unregistered_shape_is_unsupported() {
    let client = setup_cpu();
    let q = det_weight(96, 320, 4, 64, TableMode::NormalFloat);
    let a = det_matrix::<f16>(3, 320, 0);

    let err = client.lut_matmul(&a, &q, &MatmulOptions::default()).unwrap_err();
    match err {
        Error::UnsupportedShape { key } => assert!(key.contains("n=96"), "{key}"),
        other => panic!("expected UnsupportedShape, got {other:?}"),
    }

    let plan = client
        .plan(&a, &q, &MatmulOptions::default().allow_generic(true))
        .unwrap();
    assert_eq!(plan.source, ConfigSource::Generic);
    let out = client
        .lut_matmul(&a, &q, &MatmulOptions::default().allow_generic(true))
        .unwrap();
    assert_eq!(out.shape(), (3, 96));
}

#[test]
fn test_explicit_config_runs_any_shape() {
    let client = setup_cpu();
    let q = det_weight(40, 96, 3, 32, TableMode::IntUniform);
    let a = det_matrix::<bf16>(5, 96, 0);
    let config = KernelConfig {
        tile_m: 2,
        tile_n: 16,
        tile_k: 32,
        split_k: 3,
        arch: GpuArch::Host,
        dtype: DType::BF16,
    };
    let plan = client
        .plan(&a, &q, &MatmulOptions::default().with_config(config))
        .unwrap();
    assert_eq!(plan.source, ConfigSource::Explicit);
    let out = client
        .lut_matmul(&a, &q, &MatmulOptions::default().with_config(config))
        .unwrap();
    assert_eq!(out.shape(), (5, 40));

    let bad = KernelConfig { tile_k: 48, ..config };
    let err = client
        .lut_matmul(&a, &q, &MatmulOptions::default().with_config(bad))
        .unwrap_err();
    assert!(matches!(err, Error::ConfigError { .. }));
}

#[test]
fn test_tensor_parallel_degree_is_part_of_key() {
    let client = setup_cpu();
    let q = det_weight(64, 256, 2, 64, TableMode::NormalFloat);
    let a = det_matrix::<f16>(1, 256, 4);

    assert!(matches!(
        client.lut_matmul(&a, &q, &MatmulOptions::default()),
        Err(Error::UnsupportedShape { .. })
    ));
    let plan = client
        .plan(&a, &q, &MatmulOptions::default().with_tp(2))
        .unwrap();
    assert_eq!(plan.source, ConfigSource::Tuned);
    assert_eq!(plan.key.tp, 2);
}

#[test]
fn test_runtime_config_drives_defaults() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("site.json");
    std::fs::write(
        &path,
        r#"{"version":1,"entries":[{"dtype":"f16","bits":4,"group_size":32,
            "m":3,"n":96,"k":320,"arch":"host","tile_m":3,"tile_n":32,"tile_k":64,"split_k":1}]}"#,
    )
    .unwrap();

    let client = CpuClient::with_config(RuntimeConfig {
        registry_path: Some(path),
        deterministic: true,
        num_threads: Some(2),
        ..RuntimeConfig::default()
    })
    .unwrap();
    let q = det_weight(96, 320, 4, 32, TableMode::FpLike);
    let a = det_matrix::<f16>(3, 320, 9);
    let opts = client.default_options();
    assert!(opts.deterministic);
    let plan = client.plan(&a, &q, &opts).unwrap();
    assert_eq!(plan.source, ConfigSource::Tuned);
    assert_eq!(plan.config.tile_m, 3);
    assert!(client.lut_matmul(&a, &q, &opts).is_ok());
}

#[test]
fn test_quantized_matmul_entry_point() {
    init_logging();
    let q = det_weight(128, 256, 4, 128, TableMode::NormalFloat);
    let a = det_matrix::<f16>(8, 256, 6);
    let tuned = lutr::quantized_matmul(&a, &q, None).unwrap();
    assert_eq!(tuned.shape(), (8, 128));

    let config = KernelConfig::generic(DType::F16, GpuArch::Host);
    let explicit = lutr::quantized_matmul(&a, &q, Some(&config)).unwrap();
    assert_eq!(explicit.shape(), (8, 128));

    let wrong: Matrix<f32> = det_matrix(8, 256, 6);
    assert!(matches!(
        lutr::quantized_matmul(&wrong, &q, None),
        Err(Error::InvalidArgument { .. })
    ));
}
