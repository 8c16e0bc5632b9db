//! Host backend for the quantized operations

pub mod dequant;
pub mod kernels;
pub mod lut_matmul;
