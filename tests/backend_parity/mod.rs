pub mod helpers;

pub mod dispatch;
pub mod lut_gemm;
pub mod packing;
pub mod serialization;
