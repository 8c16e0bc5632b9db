pub mod dequant;
pub mod lut_matmul;

pub use dequant::DequantOps;
pub use lut_matmul::LutMatmulOps;
