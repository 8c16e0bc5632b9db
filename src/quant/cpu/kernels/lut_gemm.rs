//! Host LUT GEMM: activation `[M, K]` × quantized weight `[N, K]ᵀ` → `[M, N]`
//!
//! The launch grid mirrors the device kernel: one work unit per
//! `(tile_m × tile_n output tile, K partition)`. Work units run on rayon, each
//! with its own [`TileProcessor`]. With `split_k == 1` every unit owns its
//! output tile and stores it directly; otherwise partial sums meet in a
//! [`SplitKWorkspace`] through atomic adds.

use std::ops::Range;

use log::trace;
use rayon::prelude::*;

use super::accumulate::{SplitKWorkspace, TileAccumulator, finalize, store_tile};
use super::tile::TileProcessor;
use crate::dtype::Element;
use crate::quant::format::BitWidth;
use crate::quant::registry::KernelConfig;
use crate::quant::tensor::QuantizedWeight;

/// Partition of `[0, k)` into at most `split_k` ranges aligned to 32.
pub fn k_partitions(k: usize, split_k: usize) -> Vec<Range<usize>> {
    let split_k = split_k.max(1);
    let chunk = k.div_ceil(split_k).div_ceil(32) * 32;
    let chunk = chunk.max(32);
    (0..k)
        .step_by(chunk)
        .map(|start| start..(start + chunk).min(k))
        .collect()
}

/// Run the fused kernel and return the `[M, N]` output in `T`.
///
/// Caller has validated shapes: `act.len() == m * weight.cols()`.
pub fn lut_gemm<T: Element>(
    act: &[T],
    m: usize,
    weight: &QuantizedWeight,
    config: &KernelConfig,
) -> Vec<T> {
    debug_assert_eq!(act.len(), m * weight.cols());
    match weight.bits() {
        BitWidth::B2 => lut_gemm_bits::<T, 2>(act, m, weight, config),
        BitWidth::B3 => lut_gemm_bits::<T, 3>(act, m, weight, config),
        BitWidth::B4 => lut_gemm_bits::<T, 4>(act, m, weight, config),
    }
}

fn lut_gemm_bits<T: Element, const BITS: u32>(
    act: &[T],
    m: usize,
    weight: &QuantizedWeight,
    config: &KernelConfig,
) -> Vec<T> {
    let (n, k) = weight.shape();
    let tile_m = config.tile_m.min(m).max(1);
    let tile_n = config.tile_n.min(n).max(1);
    let tile_k = config.tile_k;

    let tiles_m = m.div_ceil(tile_m);
    let tiles_n = n.div_ceil(tile_n);
    let parts = k_partitions(k, config.split_k);
    let units = tiles_m * tiles_n * parts.len();

    trace!(
        "lut_gemm {BITS}-bit: m={m} n={n} k={k} grid={tiles_m}x{tiles_n}x{} tile={tile_m}x{tile_n}x{tile_k}",
        parts.len()
    );

    let tile_bounds = |t: usize| {
        let (tr, tc) = (t / tiles_n, t % tiles_n);
        let rows = tr * tile_m..((tr + 1) * tile_m).min(m);
        let cols = tc * tile_n..((tc + 1) * tile_n).min(n);
        (rows, cols)
    };
    let new_worker = || {
        (
            TileProcessor::<'_, BITS>::new(weight, tile_m, tile_n, tile_k),
            TileAccumulator::new(tile_m, tile_n),
        )
    };

    let acc = if parts.len() == 1 {
        let full = 0..k;
        let tiles: Vec<TileAccumulator> = (0..tiles_m * tiles_n)
            .into_par_iter()
            .map_init(new_worker, |(tp, acc), t| {
                let (rows, cols) = tile_bounds(t);
                acc.reset(rows.len(), cols.len());
                tp.process(act, rows, cols, full.clone(), acc);
                acc.clone()
            })
            .collect();

        let mut out = vec![0.0f32; m * n];
        for (t, tile) in tiles.iter().enumerate() {
            let (rows, cols) = tile_bounds(t);
            store_tile(&mut out, n, rows.start, cols.start, tile);
        }
        out
    } else {
        let ws = SplitKWorkspace::new(m, n);
        (0..units)
            .into_par_iter()
            .for_each_init(new_worker, |(tp, acc), u| {
                let (t, p) = (u / parts.len(), u % parts.len());
                let (rows, cols) = tile_bounds(t);
                acc.reset(rows.len(), cols.len());
                tp.process(act, rows.clone(), cols.clone(), parts[p].clone(), acc);
                ws.add_tile(rows.start, cols.start, acc);
            });
        ws.into_f32()
    };

    finalize(&acc)
}
