//! CUDA backend for LUT-quantized matmul

pub mod dequant;
pub mod kernels;
pub mod lut_gemm;

pub use lut_gemm::DeviceWeight;
