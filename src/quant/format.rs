//! Code widths and group sizes
//!
//! Both sets are closed: a width or group size outside them is rejected with
//! a typed error at pack time, never clamped.
//!
//! # Reduction axis contract
//!
//! Groups run along the reduction dimension K (the last, contiguous axis of a
//! `[N, K]` weight). K must be a multiple of the group size, so every row holds
//! `K / group_size` whole groups and, since every group size is a multiple of
//! 32, every row packs into a whole number of 32-bit words.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of one packed code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum BitWidth {
    /// 4 table entries
    B2,
    /// 8 table entries
    B3,
    /// 16 table entries
    B4,
}

impl BitWidth {
    /// Every supported width, narrowest first
    pub const ALL: [BitWidth; 3] = [BitWidth::B2, BitWidth::B3, BitWidth::B4];

    /// Validate a raw width.
    pub fn from_bits(bits: u32) -> Result<Self> {
        match bits {
            2 => Ok(Self::B2),
            3 => Ok(Self::B3),
            4 => Ok(Self::B4),
            _ => Err(Error::UnsupportedBitWidth { bits }),
        }
    }

    /// Bits per code
    pub const fn bits(self) -> u32 {
        match self {
            Self::B2 => 2,
            Self::B3 => 3,
            Self::B4 => 4,
        }
    }

    /// Number of distinct codes (= lookup table length)
    pub const fn num_codes(self) -> usize {
        1 << self.bits()
    }

    /// Mask selecting one code from the low bits of a word
    pub const fn mask(self) -> u32 {
        (1 << self.bits()) - 1
    }

    /// 32-bit words needed to hold `numel` densely packed codes
    pub const fn words_for(self, numel: usize) -> usize {
        (numel * self.bits() as usize).div_ceil(32)
    }
}

impl TryFrom<u32> for BitWidth {
    type Error = Error;

    fn try_from(bits: u32) -> Result<Self> {
        Self::from_bits(bits)
    }
}

impl From<BitWidth> for u32 {
    fn from(b: BitWidth) -> u32 {
        b.bits()
    }
}

impl fmt::Display for BitWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// Number of consecutive K elements sharing one scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub enum GroupSize {
    /// 32 elements per group
    G32,
    /// 64 elements per group
    G64,
    /// 128 elements per group
    G128,
    /// 256 elements per group
    G256,
}

impl GroupSize {
    /// Every supported group size, smallest first
    pub const ALL: [GroupSize; 4] = [
        GroupSize::G32,
        GroupSize::G64,
        GroupSize::G128,
        GroupSize::G256,
    ];

    /// Validate a raw group size.
    pub fn new(group_size: usize) -> Result<Self> {
        match group_size {
            32 => Ok(Self::G32),
            64 => Ok(Self::G64),
            128 => Ok(Self::G128),
            256 => Ok(Self::G256),
            _ => Err(Error::UnsupportedGroupSize {
                group_size,
                reason: "expected one of 32, 64, 128, 256".into(),
            }),
        }
    }

    /// Elements per group
    pub const fn get(self) -> usize {
        match self {
            Self::G32 => 32,
            Self::G64 => 64,
            Self::G128 => 128,
            Self::G256 => 256,
        }
    }

    /// Groups covering a reduction dimension of length `k`
    pub const fn num_groups(self, k: usize) -> usize {
        k.div_ceil(self.get())
    }

    /// Check that this group size tiles a reduction dimension of length `k` exactly.
    pub fn check_tiles(self, k: usize) -> Result<()> {
        let gs = self.get();
        if k == 0 || k % gs != 0 {
            return Err(Error::UnsupportedGroupSize {
                group_size: gs,
                reason: format!("does not evenly tile reduction dimension {k}"),
            });
        }
        Ok(())
    }
}

impl TryFrom<usize> for GroupSize {
    type Error = Error;

    fn try_from(group_size: usize) -> Result<Self> {
        Self::new(group_size)
    }
}

impl From<GroupSize> for usize {
    fn from(g: GroupSize) -> usize {
        g.get()
    }
}

impl fmt::Display for GroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.get())
    }
}
