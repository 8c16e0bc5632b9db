//! Parallel dequantization of a whole quantized weight
//!
//! Used only when a caller explicitly asks for the dense matrix; the matmul
//! path never materializes it.

use rayon::prelude::*;

use crate::dtype::Element;
use crate::quant::layout::{BLOCK_CODES, unpack_block32};
use crate::quant::tensor::QuantizedWeight;

/// Dequantize `[N, K]` into `T`, one weight row per rayon task.
pub fn dequant_rows<T: Element>(weight: &QuantizedWeight) -> Vec<T> {
    let (n, k) = weight.shape();
    let bits = weight.bits().bits();
    let gs = weight.group_size().get();
    let table = weight.table().values();

    let mut out = vec![T::default(); n * k];
    out.par_chunks_mut(k).enumerate().for_each(|(row, dst)| {
        let words = weight.row_words(row);
        let scales = weight.row_scales(row);
        let mut block = [0u8; BLOCK_CODES];
        let b = bits as usize;
        for (blk, chunk) in dst.chunks_exact_mut(BLOCK_CODES).enumerate() {
            unpack_block32(&words[blk * b..(blk + 1) * b], bits, &mut block);
            let scale = scales[blk * BLOCK_CODES / gs];
            for (o, &c) in chunk.iter_mut().zip(&block) {
                *o = T::from_f32(table[c as usize] * scale);
            }
        }
    });
    out
}
