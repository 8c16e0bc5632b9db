//! Shared helpers for lutr backend parity tests.

use lutr::quant::{QuantizedWeight, TableMode};
use lutr::{CpuClient, Element, Matrix};
#[cfg(feature = "cuda")]
use std::sync::{Mutex, OnceLock};

#[cfg(feature = "cuda")]
static CUDA_BACKEND_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn setup_cpu() -> CpuClient {
    init_logging();
    CpuClient::new().unwrap()
}

/// Deterministic pseudo-random data using a sin-based pattern.
pub fn det_data(len: usize, seed: u32) -> Vec<f32> {
    let phase = seed as f32 * 0.618;
    (0..len)
        .map(|i| ((i as f32 * 0.1 + phase).sin() * 0.5) + ((i as f32 * 0.0137 + phase).cos() * 0.25))
        .collect()
}

pub fn det_matrix<T: Element>(rows: usize, cols: usize, seed: u32) -> Matrix<T> {
    Matrix::from_f32(&det_data(rows * cols, seed), rows, cols).unwrap()
}

/// Quantized `[n, k]` weight packed from deterministic data.
pub fn det_weight(n: usize, k: usize, bits: u32, group_size: usize, mode: TableMode) -> QuantizedWeight {
    let dense = Matrix::<f32>::from_vec(det_data(n * k, 7), n, k).unwrap();
    lutr::pack(&dense, bits, group_size, mode).unwrap()
}

pub fn assert_parity_f32_tol(a: &[f32], b: &[f32], op: &str, rtol: f32, atol: f32) {
    assert_eq!(
        a.len(),
        b.len(),
        "parity_f32[{}]: length mismatch: {} vs {}",
        op,
        a.len(),
        b.len()
    );
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let diff = (x - y).abs();
        let tol = atol + rtol * y.abs();
        if diff > tol {
            panic!(
                "parity_f32[{}] at index {}: {} vs {} (diff={}, tol={})",
                op, i, x, y, diff, tol
            );
        }
    }
}

#[cfg(feature = "cuda")]
pub fn with_cuda_backend<F>(mut f: F)
where
    F: FnMut(lutr::runtime::CudaClient),
{
    let _guard = CUDA_BACKEND_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let client = match lutr::runtime::CudaClient::new(0) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to create CudaClient: {:?}, skipping", e);
            return;
        }
    };
    f(client);
}
