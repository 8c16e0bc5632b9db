//! Accumulation and output path
//!
//! Without split-K every output element is owned by exactly one work unit,
//! which accumulates in f32 registers ([`TileAccumulator`]) and stores the
//! finished tile once. The summation order per element is fixed (ascending K),
//! so results are bit-reproducible regardless of thread scheduling.
//!
//! With split-K several work units contribute to the same element. Their
//! partial sums are combined with atomic f32 adds into a shared
//! [`SplitKWorkspace`]; the order those adds land in is not fixed, so results
//! are numerically close to the unsplit product but not bit-reproducible.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::dtype::Element;

/// f32 partial sums for one `rows × cols` output tile
#[derive(Debug, Clone)]
pub struct TileAccumulator {
    acc: Vec<f32>,
    rows: usize,
    cols: usize,
}

impl TileAccumulator {
    /// Zeroed tile
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            acc: vec![0.0; rows * cols],
            rows,
            cols,
        }
    }

    /// Reset to zero with a (possibly smaller) shape, reusing the allocation
    pub fn reset(&mut self, rows: usize, cols: usize) {
        self.rows = rows;
        self.cols = cols;
        self.acc.clear();
        self.acc.resize(rows * cols, 0.0);
    }

    /// Tile rows
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Tile columns
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Partial sum at `(r, c)`
    #[inline(always)]
    pub fn get(&self, r: usize, c: usize) -> f32 {
        self.acc[r * self.cols + c]
    }

    /// Row-major sums
    pub fn values(&self) -> &[f32] {
        &self.acc
    }

    /// Mutable row-major sums
    #[inline(always)]
    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.acc
    }
}

/// Store a finished tile into an exclusively owned `[_, ld]` output.
pub fn store_tile(out: &mut [f32], ld: usize, row0: usize, col0: usize, tile: &TileAccumulator) {
    for r in 0..tile.rows() {
        let dst = &mut out[(row0 + r) * ld + col0..][..tile.cols()];
        dst.copy_from_slice(&tile.values()[r * tile.cols()..][..tile.cols()]);
    }
}

/// Shared f32 output region for split-K, written through atomic adds only
pub struct SplitKWorkspace {
    cells: Vec<AtomicU32>,
    cols: usize,
}

impl SplitKWorkspace {
    /// Zeroed `rows × cols` workspace
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            cells: (0..rows * cols).map(|_| AtomicU32::new(0)).collect(),
            cols,
        }
    }

    /// `cell[idx] += v`, atomically
    #[inline]
    pub fn atomic_add(&self, idx: usize, v: f32) {
        // The closure never returns None, so the update always succeeds.
        let _ = self.cells[idx].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
            Some((f32::from_bits(bits) + v).to_bits())
        });
    }

    /// Add a partial tile at `(row0, col0)`
    pub fn add_tile(&self, row0: usize, col0: usize, tile: &TileAccumulator) {
        for r in 0..tile.rows() {
            let base = (row0 + r) * self.cols + col0;
            for c in 0..tile.cols() {
                self.atomic_add(base + c, tile.get(r, c));
            }
        }
    }

    /// Final sums, once every work unit has finished
    pub fn into_f32(self) -> Vec<f32> {
        self.cells
            .into_iter()
            .map(|c| f32::from_bits(c.into_inner()))
            .collect()
    }
}

/// Round f32 sums down to the output dtype.
pub fn finalize<T: Element>(acc: &[f32]) -> Vec<T> {
    acc.iter().map(|&v| T::from_f32(v)).collect()
}
