//! Weight packer: dense `[N, K]` weights → [`QuantizedWeight`]
//!
//! Offline and pure. For every group of `group_size` consecutive K elements:
//!
//! 1. pick a scale so that `w / scale` falls inside the table's range,
//! 2. map each normalized weight to its nearest table entry (ties go to the
//!    lower code),
//! 3. bit-pack the codes.
//!
//! The scale is `max(max_w / t_max, min_w / t_min)`, taking only the terms
//! whose signs agree. For a symmetric table this is `absmax / max|t|`; for
//! `int{b}` it is the usual symmetric integer scale, so `int-uniform` packing
//! reproduces a linear integer quantizer exactly. An all-zero group gets scale
//! 0 and the code nearest to 0.

use rayon::prelude::*;

use super::format::{BitWidth, GroupSize};
use super::layout::{PackedCodes, pack_into};
use super::tables::{LookupTable, TableMode};
use super::tensor::QuantizedWeight;
use crate::dtype::Element;
use crate::error::{Error, Result};
use crate::tensor::Matrix;

/// Quantize a `[N, K]` weight matrix.
///
/// # Errors
///
/// - `UnsupportedBitWidth` if `bits` ∉ {2, 3, 4}
/// - `UnsupportedGroupSize` if `group_size` ∉ {32, 64, 128, 256} or does not
///   evenly tile K
/// - `InvalidArgument` for an empty matrix or non-finite weights
pub fn pack<T: Element>(
    weight: &Matrix<T>,
    bits: u32,
    group_size: usize,
    mode: TableMode,
) -> Result<QuantizedWeight> {
    let bits = BitWidth::from_bits(bits)?;
    let group_size = GroupSize::new(group_size)?;
    let (rows, cols) = weight.shape();
    group_size.check_tiles(cols)?;
    if rows == 0 {
        return Err(Error::InvalidArgument {
            arg: "weight",
            reason: "cannot pack a matrix with zero rows".into(),
        });
    }

    let w = weight.to_f32_vec();
    if let Some(i) = w.iter().position(|v| !v.is_finite()) {
        return Err(Error::InvalidArgument {
            arg: "weight",
            reason: format!("non-finite value {} at ({}, {})", w[i], i / cols, i % cols),
        });
    }

    let gs = group_size.get();
    let table = if mode.needs_data() {
        LookupTable::fit(bits, mode, &absmax_normalized(&w, gs))?
    } else {
        LookupTable::fixed(bits, mode)?
    };

    let groups_per_row = group_size.num_groups(cols);
    let words_per_row = bits.words_for(cols);
    let mut words = vec![0u32; rows * words_per_row];
    let mut scales = vec![0.0f32; rows * groups_per_row];
    let t_max = table.max_value();
    let t_min = table.min_value();

    words
        .par_chunks_mut(words_per_row)
        .zip(scales.par_chunks_mut(groups_per_row))
        .zip(w.par_chunks(cols))
        .for_each(|((row_words, row_scales), row)| {
            let mut codes = vec![0u8; cols];
            for (g, group) in row.chunks_exact(gs).enumerate() {
                let scale = group_scale(group, t_max, t_min);
                row_scales[g] = scale;
                for (c, &v) in codes[g * gs..(g + 1) * gs].iter_mut().zip(group) {
                    let x = if scale > 0.0 { v / scale } else { 0.0 };
                    *c = table.nearest(x);
                }
            }
            pack_into(&codes, bits.bits(), row_words);
        });

    log::debug!(
        "packed [{rows}, {cols}] weight: {bits} {group_size} table={}",
        table.mode()
    );

    let codes = PackedCodes::from_words(words, bits, rows * cols)?;
    QuantizedWeight::from_parts(codes, scales, table, rows, cols, group_size)
}

/// Scale mapping a group into `[t_min, t_max]`.
#[inline]
pub(crate) fn group_scale(group: &[f32], t_max: f32, t_min: f32) -> f32 {
    let (lo, hi) = group
        .iter()
        .fold((0.0f32, 0.0f32), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let mut scale = 0.0f32;
    if hi > 0.0 && t_max > 0.0 {
        scale = scale.max(hi / t_max);
    }
    if lo < 0.0 && t_min < 0.0 {
        scale = scale.max(lo / t_min);
    }
    scale
}

/// Weights divided by their group's absolute maximum; zero groups are skipped.
fn absmax_normalized(w: &[f32], gs: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(w.len());
    for group in w.chunks_exact(gs) {
        let absmax = group.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        if absmax > 0.0 {
            out.extend(group.iter().map(|v| v / absmax));
        }
    }
    out
}
