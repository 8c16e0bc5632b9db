pub mod accumulate;
pub mod dequant;
pub mod lut_gemm;
pub mod tile;
