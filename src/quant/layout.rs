//! Packed code layout
//!
//! Codes are stored LSB-first in a little-endian stream of `u32` words. The
//! code at linear index `i` occupies bits `[i * bits, (i + 1) * bits)` of the
//! stream, so any code is recoverable from its index with one or two word
//! loads plus shift/mask. 3-bit codes straddle word boundaries.
//!
//! For a weight of shape `[N, K]` the linear index of element `(n, k)` is
//! `n * K + k`. K is always a multiple of 32 (every group size is), so each
//! row starts on a word boundary at word `n * K * bits / 32`, and every run of
//! 32 codes starting at a multiple of 32 fills exactly `bits` whole words.
//! That run is the unpacking step of the kernels ([`unpack_block32`]).

use super::format::BitWidth;
use crate::error::{Error, Result};

/// Codes per unpacking block
pub const BLOCK_CODES: usize = 32;

/// Densely bit-packed code stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedCodes {
    words: Vec<u32>,
    bits: BitWidth,
    len: usize,
}

impl PackedCodes {
    /// Pack one code per element.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if any code does not fit in `bits`.
    pub fn pack(codes: &[u8], bits: BitWidth) -> Result<Self> {
        check_codes(codes, bits)?;
        let mut words = vec![0u32; bits.words_for(codes.len())];
        pack_into(codes, bits.bits(), &mut words);
        Ok(Self {
            words,
            bits,
            len: codes.len(),
        })
    }

    /// Wrap an existing word stream (e.g. read back from disk).
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the word count does not match `len` codes, or if
    /// padding bits past the last code are set.
    pub fn from_words(words: Vec<u32>, bits: BitWidth, len: usize) -> Result<Self> {
        let expected = bits.words_for(len);
        if words.len() != expected {
            return Err(Error::InvalidArgument {
                arg: "words",
                reason: format!(
                    "{len} {bits} codes need {expected} words, got {}",
                    words.len()
                ),
            });
        }
        let used = len * bits.bits() as usize;
        if used % 32 != 0 {
            let tail = words[expected - 1] >> (used % 32);
            if tail != 0 {
                return Err(Error::InvalidArgument {
                    arg: "words",
                    reason: "padding bits after the last code are not zero".into(),
                });
            }
        }
        Ok(Self { words, bits, len })
    }

    /// Code width
    pub fn bits(&self) -> BitWidth {
        self.bits
    }

    /// Number of codes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the stream holds no codes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw word stream
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Consume into the raw word stream
    pub fn into_words(self) -> Vec<u32> {
        self.words
    }

    /// Bytes of packed storage
    pub fn storage_bytes(&self) -> usize {
        self.words.len() * std::mem::size_of::<u32>()
    }

    /// Code at a linear index
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    #[inline]
    pub fn get(&self, index: usize) -> u8 {
        assert!(index < self.len, "code index {index} out of range {}", self.len);
        code_at(&self.words, self.bits.bits(), index)
    }

    /// Decode `out.len()` codes starting at `start`.
    pub fn unpack_range(&self, start: usize, out: &mut [u8]) -> Result<()> {
        if start + out.len() > self.len {
            return Err(Error::InvalidArgument {
                arg: "start",
                reason: format!(
                    "range {start}..{} exceeds {} codes",
                    start + out.len(),
                    self.len
                ),
            });
        }
        let bits = self.bits.bits();
        for (i, o) in out.iter_mut().enumerate() {
            *o = code_at(&self.words, bits, start + i);
        }
        Ok(())
    }

    /// Decode every code
    pub fn unpack(&self) -> Vec<u8> {
        let bits = self.bits.bits();
        (0..self.len).map(|i| code_at(&self.words, bits, i)).collect()
    }
}

/// Reject codes wider than `bits`.
pub(crate) fn check_codes(codes: &[u8], bits: BitWidth) -> Result<()> {
    let mask = bits.mask();
    if let Some((i, &c)) = codes.iter().enumerate().find(|&(_, &c)| c as u32 > mask) {
        return Err(Error::InvalidArgument {
            arg: "codes",
            reason: format!("code {c} at index {i} does not fit in {bits}"),
        });
    }
    Ok(())
}

/// OR codes into a zeroed word slice, starting at bit 0 of `words[0]`.
pub(crate) fn pack_into(codes: &[u8], bits: u32, words: &mut [u32]) {
    let b = bits as usize;
    for (i, &c) in codes.iter().enumerate() {
        let bit = i * b;
        let w = bit / 32;
        let off = (bit % 32) as u32;
        words[w] |= (c as u32) << off;
        if off + bits > 32 {
            words[w + 1] |= (c as u32) >> (32 - off);
        }
    }
}

/// Code at linear `index` of a word stream.
#[inline(always)]
pub fn code_at(words: &[u32], bits: u32, index: usize) -> u8 {
    let bit = index * bits as usize;
    let w = bit / 32;
    let off = (bit % 32) as u32;
    let mut v = words[w] >> off;
    if off + bits > 32 {
        v |= words[w + 1] << (32 - off);
    }
    (v & ((1 << bits) - 1)) as u8
}

/// Decode 32 consecutive codes from exactly `bits` words.
#[inline(always)]
pub fn unpack_block32(words: &[u32], bits: u32, out: &mut [u8; BLOCK_CODES]) {
    debug_assert_eq!(words.len(), bits as usize);
    let mut acc: u128 = 0;
    for (i, &w) in words.iter().enumerate() {
        acc |= (w as u128) << (32 * i);
    }
    let mask = (1u128 << bits) - 1;
    for o in out.iter_mut() {
        *o = (acc & mask) as u8;
        acc >>= bits;
    }
}

/// Word offset of the first code of `row` in an `[N, k]` packed matrix.
#[inline(always)]
pub fn row_word_offset(row: usize, k: usize, bits: u32) -> usize {
    debug_assert_eq!(k % BLOCK_CODES, 0);
    row * k * bits as usize / 32
}

/// Decode a `rows × cols` tile starting at `(row0, col0)` of an `[N, k]`
/// packed matrix into `out` (row-major, `cols` per row).
///
/// `col0` and `cols` must be multiples of 32.
#[allow(clippy::too_many_arguments)]
pub fn unpack_tile(
    words: &[u32],
    bits: u32,
    k: usize,
    row0: usize,
    rows: usize,
    col0: usize,
    cols: usize,
    out: &mut [u8],
) {
    debug_assert_eq!(col0 % BLOCK_CODES, 0);
    debug_assert_eq!(cols % BLOCK_CODES, 0);
    debug_assert!(out.len() >= rows * cols);

    let b = bits as usize;
    let mut block = [0u8; BLOCK_CODES];
    for r in 0..rows {
        let base = row_word_offset(row0 + r, k, bits) + col0 * b / 32;
        let dst = &mut out[r * cols..(r + 1) * cols];
        for (j, chunk) in dst.chunks_exact_mut(BLOCK_CODES).enumerate() {
            let w = base + j * b;
            unpack_block32(&words[w..w + b], bits, &mut block);
            chunk.copy_from_slice(&block);
        }
    }
}
