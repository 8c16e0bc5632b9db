//! Fused LUT GEMM against the scalar reference

use super::helpers::*;
use half::{bf16, f16};
use lutr::quant::acceptance::{Tolerance, failure_rate, reference_matmul, relative_error};
use lutr::quant::registry::SM80_G256_FAILURE_RATE;
use lutr::quant::{LutMatmulOps, MatmulOptions, TableMode};
use lutr::{Element, Matrix};

fn check_against_reference<T: Element>(m: usize, n: usize, k: usize, bits: u32, gs: usize) {
    let client = setup_cpu();
    let q = det_weight(n, k, bits, gs, TableMode::NormalFloat);
    let a = det_matrix::<T>(m, k, bits + gs as u32);
    let out = client
        .lut_matmul(&a, &q, &MatmulOptions::default())
        .unwrap();
    assert_eq!(out.shape(), (m, n));
    let expect = reference_matmul(&a, &q).unwrap();
    let tol = Tolerance::for_output::<T>(&expect);
    assert_parity_f32_tol(
        &out.to_f32_vec(),
        &expect,
        &format!("{} {bits}-bit g{gs} {m}x{n}x{k}", T::DTYPE),
        tol.rtol,
        tol.atol,
    );
}

#[test]
fn test_tuned_host_shapes_match_reference() {
    for bits in [2, 3, 4] {
        for gs in [32, 64, 128, 256] {
            for m in [1, 8] {
                check_against_reference::<f16>(m, 128, 256, bits, gs);
                check_against_reference::<bf16>(m, 256, 512, bits, gs);
            }
        }
    }
}

#[test]
fn test_every_table_mode() {
    let client = setup_cpu();
    let a = det_matrix::<f16>(8, 256, 1);
    for mode in [
        TableMode::IntUniform,
        TableMode::FpLike,
        TableMode::NormalFloat,
        TableMode::NormalFloatCalibrated { sigma: None },
        TableMode::NormalFloatCalibrated { sigma: Some(0.3) },
    ] {
        let q = det_weight(128, 256, 3, 64, mode);
        let out = client.lut_matmul(&a, &q, &MatmulOptions::default()).unwrap();
        let expect = reference_matmul(&a, &q).unwrap();
        let tol = Tolerance::for_output::<f16>(&expect);
        assert!(tol.accepts(&out.to_f32_vec(), &expect), "{mode}");
    }
}

/// 4-bit g256 is the configuration with a known residual failure rate.
#[test]
fn test_4bit_g256_failure_rate() {
    let client = setup_cpu();
    let q = det_weight(128, 256, 4, 256, TableMode::NormalFloat);
    let passed = (0..1000u32).map(|seed| {
        let a = det_matrix::<f16>(1, 256, seed);
        let out = client.lut_matmul(&a, &q, &MatmulOptions::default()).unwrap();
        let expect = reference_matmul(&a, &q).unwrap();
        Tolerance::for_output::<f16>(&expect).accepts(&out.to_f32_vec(), &expect)
    });
    let rate = failure_rate(passed);
    assert!(rate <= SM80_G256_FAILURE_RATE, "failure rate {rate}");
}

#[test]
fn test_split_k_close_and_deterministic_mode_exact() {
    let client = setup_cpu();
    // (m=1, n=256, k=512) is registered with split_k = 2 on the host
    let q = det_weight(256, 512, 4, 64, TableMode::NormalFloat);
    let a = det_matrix::<f16>(1, 512, 11);
    let expect = reference_matmul(&a, &q).unwrap();

    let split = client.lut_matmul(&a, &q, &MatmulOptions::default()).unwrap();
    assert!(relative_error(&split.to_f32_vec(), &expect) < 1e-2);

    let opts = MatmulOptions::default().deterministic(true);
    let first = client.lut_matmul(&a, &q, &opts).unwrap();
    for _ in 0..20 {
        assert_eq!(client.lut_matmul(&a, &q, &opts).unwrap(), first);
    }
}

/// Llama-style projection: 4096×4096, 4-bit, g64, single-token decode.
#[test]
#[ignore = "large shape; run with --release -- --ignored"]
fn test_llama_projection_decode() {
    let client = setup_cpu();
    let (n, k) = (4096, 4096);
    let q = det_weight(n, k, 4, 64, TableMode::NormalFloat);
    let a = det_matrix::<f16>(1, k, 5);
    let expect = reference_matmul(&a, &q).unwrap();

    let out = client.lut_matmul(&a, &q, &MatmulOptions::default()).unwrap();
    let err = relative_error(&out.to_f32_vec(), &expect);
    assert!(err < 1e-2, "relative error {err}");

    let opts = MatmulOptions::default().deterministic(true);
    let first = client.lut_matmul(&a, &q, &opts).unwrap();
    for run in 0..100 {
        assert_eq!(client.lut_matmul(&a, &q, &opts).unwrap(), first, "run {run}");
    }
}

#[test]
fn test_batch_matches_single_calls() {
    let client = setup_cpu();
    let a = det_matrix::<bf16>(8, 256, 2);
    let weights = [
        det_weight(128, 256, 2, 32, TableMode::IntUniform),
        det_weight(128, 256, 4, 128, TableMode::FpLike),
    ];
    let refs: Vec<_> = weights.iter().collect();
    let opts = MatmulOptions::default();
    let batch = client.lut_matmul_batch(&a, &refs, &opts).unwrap();
    for (out, w) in batch.iter().zip(&weights) {
        assert_eq!(out, &client.lut_matmul(&a, w, &opts).unwrap());
    }
}

#[test]
fn test_zero_activation_gives_zero() {
    let client = setup_cpu();
    let q = det_weight(128, 256, 3, 32, TableMode::NormalFloat);
    let a = Matrix::<f16>::zeros(1, 256);
    let out = client.lut_matmul(&a, &q, &MatmulOptions::default()).unwrap();
    assert!(out.as_slice().iter().all(|v| v.to_f32() == 0.0));
}

#[cfg(feature = "cuda")]
#[test]
fn test_cuda_matches_host() {
    let cpu = setup_cpu();
    with_cuda_backend(|cuda| {
        let opts = MatmulOptions::default().allow_generic(true);
        for bits in [2, 3, 4] {
            for gs in [32, 64, 128, 256] {
                let q = det_weight(128, 256, bits, gs, TableMode::NormalFloat);
                let a = det_matrix::<f16>(8, 256, bits);
                let host = cpu.lut_matmul(&a, &q, &opts).unwrap();
                let dev = cuda.lut_matmul(&a, &q, &opts).unwrap();
                let expect = reference_matmul(&a, &q).unwrap();
                let tol = Tolerance::for_output::<f16>(&expect);
                assert_parity_f32_tol(
                    &dev.to_f32_vec(),
                    &host.to_f32_vec(),
                    &format!("cuda {bits}-bit g{gs}"),
                    tol.rtol,
                    tol.atol,
                );
            }
        }
    });
}

#[cfg(feature = "cuda")]
#[test]
fn test_cuda_resident_weight_matches_upload_per_call() {
    use lutr::quant::cuda::DeviceWeight;

    with_cuda_backend(|cuda| {
        let opts = MatmulOptions::default().allow_generic(true);
        let q = det_weight(128, 256, 4, 64, TableMode::NormalFloat);
        let resident = DeviceWeight::upload(&cuda, &q).unwrap();
        assert_eq!(resident.shape(), q.shape());

        for m in [1, 8, 16] {
            let a = det_matrix::<bf16>(m, 256, m as u32);
            let per_call = cuda.lut_matmul(&a, &q, &opts).unwrap();
            let reused = cuda.lut_matmul_resident(&a, &resident, &opts).unwrap();
            assert_eq!(reused, per_call, "m={m}");
        }

        let wrong_k = det_matrix::<bf16>(1, 128, 0);
        assert!(cuda.lut_matmul_resident(&wrong_k, &resident, &opts).is_err());
    });
}
