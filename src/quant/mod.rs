pub mod acceptance;
pub mod cpu;
#[cfg(feature = "cuda")]
pub mod cuda;
pub mod dispatch;
pub mod format;
pub mod layout;
pub mod packer;
pub mod registry;
pub mod serialize;
pub mod tables;
pub mod tensor;
pub mod traits;

pub use dispatch::{ConfigSource, DispatchPlan, MatmulOptions};
pub use format::{BitWidth, GroupSize};
pub use layout::PackedCodes;
pub use packer::pack;
pub use registry::{Advisory, ConfigKey, GpuArch, KernelConfig, KernelRegistry, PerfTier};
pub use tables::{LookupTable, TableMode};
pub use tensor::QuantizedWeight;
pub use traits::DequantOps;
pub use traits::LutMatmulOps;
