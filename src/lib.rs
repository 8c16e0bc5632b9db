//! # lutr
//!
//! **LUT-quantized GEMM: dense activations × lookup-table-quantized weights.**
//!
//! Each weight is stored as a 2/3/4-bit code indexing a small lookup table,
//! with one scale per group of 32..256 elements along the reduction axis. The
//! matmul kernels unpack codes, look them up, apply the group scale and
//! accumulate in f32 inside the tiled multiply, never materializing the
//! dense weight.
//!
//! ```text
//!  offline                         every call
//! ┌────────────┐  QuantizedWeight  ┌──────────────┐   ┌────────────────────┐
//! │ quant::pack│ ────────────────► │ dispatch plan│──►│ tile executor       │
//! │ (tables,   │   (serialize to   │ (registry:   │   │ (host rayon / CUDA) │
//! │  layout)   │    safetensors)   │  exact match)│   │ unpack→LUT→scale→acc│
//! └────────────┘                   └──────────────┘   └────────────────────┘
//! ```
//!
//! ## Design
//!
//! - **Extension traits**: `DequantOps`, `LutMatmulOps` implemented on backend clients
//! - **QuantizedWeight**: separate type, not a dtype; codes + scales + table
//! - **Closed-world registry**: exact-match tuned configs, explicit generic opt-in
//! - **Custom kernels**: host tile executor on rayon, PTX kernels behind `cuda`

pub mod config;
pub mod dtype;
pub mod error;
pub mod quant;
pub mod runtime;
pub mod tensor;

use std::sync::OnceLock;

pub use config::RuntimeConfig;
pub use dtype::{DType, Element};
pub use error::{Error, Result};
pub use quant::{
    DequantOps, KernelConfig, LutMatmulOps, MatmulOptions, QuantizedWeight, TableMode, pack,
};
pub use runtime::CpuClient;
pub use tensor::Matrix;

static DEFAULT_CLIENT: OnceLock<CpuClient> = OnceLock::new();

/// Process-wide host client configured from `LUTR_*` environment variables.
pub fn default_client() -> Result<&'static CpuClient> {
    if let Some(client) = DEFAULT_CLIENT.get() {
        return Ok(client);
    }
    let client = CpuClient::from_env()?;
    Ok(DEFAULT_CLIENT.get_or_init(|| client))
}

/// `activation [M, K] × weight → [M, N]` on the default host client.
///
/// With `config = None` the registry is consulted for the exact call shape; a
/// miss is `UnsupportedShape` unless `LUTR_ALLOW_GENERIC` is set.
pub fn quantized_matmul<T: Element>(
    activation: &Matrix<T>,
    weight: &QuantizedWeight,
    config: Option<&KernelConfig>,
) -> Result<Matrix<T>> {
    let client = default_client()?;
    let mut options = client.default_options();
    options.config = config.copied();
    client.lut_matmul(activation, weight, &options)
}
