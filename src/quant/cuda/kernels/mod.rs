//! CUDA kernel loading for the LUT GEMM kernels

use cudarc::driver::safe::{CudaContext, CudaFunction, CudaModule};
use cudarc::nvrtc::Ptx;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::error::{Error, Result};

/// Directory containing compiled PTX files (set by build.rs)
const KERNEL_DIR: &str = env!("CUDA_KERNEL_DIR");

fn load_ptx(name: &str) -> Ptx {
    Ptx::from_file(format!("{KERNEL_DIR}/{name}.ptx"))
}

/// Fused GEMM, split-K finalize and dequantize kernels
pub const LUT_GEMM_MODULE: &str = "lut_gemm";

/// Loaded modules, keyed by (device ordinal, module name)
static MODULE_CACHE: OnceLock<Mutex<HashMap<(usize, &'static str), Arc<CudaModule>>>> =
    OnceLock::new();

/// Get or load a CUDA module from PTX.
pub fn get_or_load_module(
    context: &Arc<CudaContext>,
    device_index: usize,
    module_name: &'static str,
) -> Result<Arc<CudaModule>> {
    let cache = MODULE_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut guard = cache.lock().map_err(|e| Error::DeviceError {
        reason: format!("kernel cache mutex poisoned: {e}"),
    })?;

    let key = (device_index, module_name);
    if let Some(module) = guard.get(&key) {
        return Ok(module.clone());
    }

    let module = context
        .load_module(load_ptx(module_name))
        .map_err(|e| Error::DeviceError {
            reason: format!("failed to load CUDA module '{module_name}': {e:?}"),
        })?;
    log::debug!("loaded CUDA module {module_name} on device {device_index}");

    guard.insert(key, module.clone());
    Ok(module)
}

/// Get a kernel function from a loaded module.
pub fn get_kernel_function(module: &Arc<CudaModule>, kernel_name: &str) -> Result<CudaFunction> {
    module
        .load_function(kernel_name)
        .map_err(|e| Error::DeviceError {
            reason: format!("failed to get kernel '{kernel_name}': {e:?}"),
        })
}

/// Kernel entry point name for an activation dtype and code width.
pub fn lut_gemm_kernel_name(dtype: crate::dtype::DType, bits: u32) -> String {
    format!("lut_gemm_{}_b{bits}", dtype.name())
}
