//! Tile processor: fused unpack → table lookup → scale → accumulate
//!
//! One processor is created per worker and reused across work units. It holds
//! a private copy of the lookup table (the host analogue of replicating the
//! table into shared memory per thread block) and scratch space for one code
//! tile and one activation tile. The dequantized weight only ever exists one
//! `tile_k` row segment at a time.
//!
//! Dequantized values are formed as `table[code] * scale` in f32 through a
//! per-group scaled copy of the table, which is the same single f32 multiply
//! the reference dequantization performs.

use std::ops::Range;

use super::accumulate::TileAccumulator;
use crate::dtype::Element;
use crate::quant::layout::unpack_tile;
use crate::quant::tensor::QuantizedWeight;

/// Tile executor specialized on the code width
pub struct TileProcessor<'w, const BITS: u32> {
    lut: [f32; 16],
    scaled_lut: [f32; 16],
    words: &'w [u32],
    scales: &'w [f32],
    k: usize,
    group_size: usize,
    groups_per_row: usize,
    tile_n: usize,
    tile_k: usize,
    codes: Vec<u8>,
    a_tile: Vec<f32>,
    w_row: Vec<f32>,
}

impl<'w, const BITS: u32> TileProcessor<'w, BITS> {
    const NUM_CODES: usize = 1 << BITS;

    /// Processor for `weight` with scratch sized for `tile_m × tile_n × tile_k`.
    pub fn new(weight: &'w QuantizedWeight, tile_m: usize, tile_n: usize, tile_k: usize) -> Self {
        debug_assert_eq!(weight.bits().bits(), BITS);
        debug_assert_eq!(tile_k % 32, 0);
        Self {
            lut: weight.table().to_array(),
            scaled_lut: [0.0; 16],
            words: weight.codes().words(),
            scales: weight.scales(),
            k: weight.cols(),
            group_size: weight.group_size().get(),
            groups_per_row: weight.groups_per_row(),
            tile_n,
            tile_k,
            codes: vec![0; tile_n * tile_k],
            a_tile: vec![0.0; tile_m * tile_k],
            w_row: vec![0.0; tile_k],
        }
    }

    /// Accumulate `A[rows, k_range] · W[cols, k_range]ᵀ` into `acc`.
    ///
    /// `act` is the full row-major `[M, K]` activation. `k_range` bounds must
    /// be multiples of 32; `acc` must be shaped `rows.len() × cols.len()`.
    pub fn process<T: Element>(
        &mut self,
        act: &[T],
        rows: Range<usize>,
        cols: Range<usize>,
        k_range: Range<usize>,
        acc: &mut TileAccumulator,
    ) {
        let tm = rows.len();
        let tn = cols.len();
        debug_assert!(tn <= self.tile_n);
        debug_assert_eq!(acc.rows(), tm);
        debug_assert_eq!(acc.cols(), tn);
        debug_assert_eq!(k_range.start % 32, 0);
        debug_assert_eq!(k_range.end % 32, 0);

        let k = self.k;
        let mut kt = k_range.start;
        while kt < k_range.end {
            let kl = self.tile_k.min(k_range.end - kt);

            // Code tile: tn rows × kl codes
            unpack_tile(self.words, BITS, k, cols.start, tn, kt, kl, &mut self.codes);

            // Activation tile, widened once
            for (r, m) in rows.clone().enumerate() {
                let src = &act[m * k + kt..][..kl];
                for (dst, &v) in self.a_tile[r * kl..][..kl].iter_mut().zip(src) {
                    *dst = v.to_f32();
                }
            }

            for j in 0..tn {
                self.dequant_segment(cols.start + j, kt, kl, j);
                let w_row = &self.w_row[..kl];
                let out = acc.values_mut();
                for r in 0..tm {
                    let a_row = &self.a_tile[r * kl..][..kl];
                    let mut sum = out[r * tn + j];
                    for (&a, &w) in a_row.iter().zip(w_row) {
                        sum += a * w;
                    }
                    out[r * tn + j] = sum;
                }
            }

            kt += kl;
        }
    }

    /// Dequantize weight row `n`, columns `kt..kt+kl`, from code-tile row `j`.
    #[inline]
    fn dequant_segment(&mut self, n: usize, kt: usize, kl: usize, j: usize) {
        let codes = &self.codes[j * kl..][..kl];
        let scale_row = &self.scales[n * self.groups_per_row..][..self.groups_per_row];

        let mut pos = 0;
        while pos < kl {
            let g = (kt + pos) / self.group_size;
            let seg_end = ((g + 1) * self.group_size - kt).min(kl);
            let scale = scale_row[g];
            for c in 0..Self::NUM_CODES {
                self.scaled_lut[c] = self.lut[c] * scale;
            }
            for (w, &c) in self.w_row[pos..seg_end].iter_mut().zip(&codes[pos..seg_end]) {
                *w = self.scaled_lut[c as usize];
            }
            pos = seg_end;
        }
    }
}
