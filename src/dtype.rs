//! Element types for activations, outputs and accumulation
//!
//! Activations arrive in one of two 16-bit storage formats with different
//! exponent/mantissa splits (`f16` = 5/10, `bf16` = 8/7). Accumulation always
//! happens in `f32`, which is wider than either.

use half::{bf16, f16};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar storage type of a dense matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// IEEE 754 binary16
    F16,
    /// bfloat16
    BF16,
    /// IEEE 754 binary32 (accumulation / reference only)
    F32,
}

impl DType {
    /// Size of one element in bytes
    pub const fn size_in_bytes(self) -> usize {
        match self {
            Self::F16 | Self::BF16 => 2,
            Self::F32 => 4,
        }
    }

    /// Whether the quantized kernel accepts this dtype as activation input
    pub const fn is_activation(self) -> bool {
        matches!(self, Self::F16 | Self::BF16)
    }

    /// Short lowercase name, matching the registry table spelling
    pub const fn name(self) -> &'static str {
        match self {
            Self::F16 => "f16",
            Self::BF16 => "bf16",
            Self::F32 => "f32",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Scalar element that a [`crate::Matrix`] can hold.
///
/// Conversions go through `f32`; `from_f32` rounds to nearest-even like the
/// device conversion intrinsics do.
pub trait Element:
    Copy + Default + PartialEq + fmt::Debug + Send + Sync + bytemuck::Pod + 'static
{
    /// Runtime tag for this element type
    const DTYPE: DType;

    /// Widen to f32
    fn to_f32(self) -> f32;

    /// Narrow from f32
    fn from_f32(v: f32) -> Self;
}

impl Element for f16 {
    const DTYPE: DType = DType::F16;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    #[inline(always)]
    fn from_f32(v: f32) -> Self {
        f16::from_f32(v)
    }
}

impl Element for bf16 {
    const DTYPE: DType = DType::BF16;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        bf16::to_f32(self)
    }

    #[inline(always)]
    fn from_f32(v: f32) -> Self {
        bf16::from_f32(v)
    }
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline(always)]
    fn from_f32(v: f32) -> Self {
        v
    }
}
