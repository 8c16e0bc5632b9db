//! Quantized weight matrix: packed codes + group scales + lookup table
//!
//! `QuantizedWeight` is a separate type from [`crate::Matrix`], not a dtype.
//! It supports three operations: storage, reference dequantization and the
//! fused LUT matmul.

use super::format::{BitWidth, GroupSize};
use super::layout::{PackedCodes, code_at, row_word_offset};
use super::tables::LookupTable;
use crate::error::{Error, Result};

/// LUT-quantized weight of a linear layer
///
/// Stored as `[N, K]` (out_features × in_features), row-major, with groups
/// running along K. The matmul treats it as the K×N right-hand operand.
///
/// # Invariants
///
/// - `codes.len() == rows * cols` and `codes.bits() == table.bits()`
/// - `cols` is a multiple of `group_size`
/// - `scales` holds `rows * cols / group_size` finite values, row-major
///   (`scales[n * groups_per_row + g]`)
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedWeight {
    codes: PackedCodes,
    scales: Vec<f32>,
    table: LookupTable,
    rows: usize,
    cols: usize,
    group_size: GroupSize,
}

impl QuantizedWeight {
    /// Assemble from parts, checking every invariant.
    pub fn from_parts(
        codes: PackedCodes,
        scales: Vec<f32>,
        table: LookupTable,
        rows: usize,
        cols: usize,
        group_size: GroupSize,
    ) -> Result<Self> {
        if rows == 0 {
            return Err(Error::InvalidArgument {
                arg: "rows",
                reason: "quantized weight needs at least one row".into(),
            });
        }
        group_size.check_tiles(cols)?;

        if codes.bits() != table.bits() {
            return Err(Error::InvalidArgument {
                arg: "table",
                reason: format!(
                    "{} table cannot index {} codes",
                    table.bits(),
                    codes.bits()
                ),
            });
        }
        if codes.len() != rows * cols {
            return Err(Error::InvalidArgument {
                arg: "codes",
                reason: format!(
                    "expected {} codes for [{rows}, {cols}], got {}",
                    rows * cols,
                    codes.len()
                ),
            });
        }
        let expected_scales = rows * group_size.num_groups(cols);
        if scales.len() != expected_scales {
            return Err(Error::InvalidArgument {
                arg: "scales",
                reason: format!(
                    "expected {expected_scales} group scales, got {}",
                    scales.len()
                ),
            });
        }
        if let Some(bad) = scales.iter().find(|s| !s.is_finite()) {
            return Err(Error::InvalidArgument {
                arg: "scales",
                reason: format!("group scales must be finite, found {bad}"),
            });
        }

        Ok(Self {
            codes,
            scales,
            table,
            rows,
            cols,
            group_size,
        })
    }

    /// Code width
    pub fn bits(&self) -> BitWidth {
        self.codes.bits()
    }

    /// Elements per scale group
    pub fn group_size(&self) -> GroupSize {
        self.group_size
    }

    /// Output features (N)
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Input features / reduction length (K)
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(N, K)`
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Scale groups per row
    pub fn groups_per_row(&self) -> usize {
        self.group_size.num_groups(self.cols)
    }

    /// Packed codes
    pub fn codes(&self) -> &PackedCodes {
        &self.codes
    }

    /// All group scales, row-major
    pub fn scales(&self) -> &[f32] {
        &self.scales
    }

    /// Lookup table
    pub fn table(&self) -> &LookupTable {
        &self.table
    }

    /// Packed words of one output row
    pub fn row_words(&self, n: usize) -> &[u32] {
        let bits = self.bits().bits();
        let start = row_word_offset(n, self.cols, bits);
        let end = row_word_offset(n + 1, self.cols, bits);
        &self.codes.words()[start..end]
    }

    /// Group scales of one output row
    pub fn row_scales(&self, n: usize) -> &[f32] {
        let g = self.groups_per_row();
        &self.scales[n * g..(n + 1) * g]
    }

    /// Code of element `(n, k)`
    #[inline]
    pub fn code(&self, n: usize, k: usize) -> u8 {
        code_at(self.codes.words(), self.bits().bits(), n * self.cols + k)
    }

    /// `table[code] * scale` for element `(n, k)`
    #[inline]
    pub fn dequant_element(&self, n: usize, k: usize) -> f32 {
        let scale = self.scales[n * self.groups_per_row() + k / self.group_size.get()];
        self.table.get(self.code(n, k)) * scale
    }

    /// Scalar reference dequantization to a dense `[N, K]` f32 buffer.
    ///
    /// This is the oracle the fused kernels are checked against; it computes
    /// every element exactly as [`Self::dequant_element`] does.
    pub fn dequantize(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.rows * self.cols);
        for n in 0..self.rows {
            for k in 0..self.cols {
                out.push(self.dequant_element(n, k));
            }
        }
        out
    }

    /// Bytes of codes + scales + table
    pub fn storage_bytes(&self) -> usize {
        self.codes.storage_bytes()
            + self.scales.len() * std::mem::size_of::<f32>()
            + self.table.num_codes() * std::mem::size_of::<f32>()
    }
}
