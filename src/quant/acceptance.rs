//! Reference oracle and acceptance measures
//!
//! The oracle shares no code with the fused kernels: it dequantizes
//! element by element through [`QuantizedWeight::dequant_element`] and runs a
//! plain triple loop accumulating in f64.

use crate::dtype::Element;
use crate::error::{Error, Result};
use crate::quant::QuantizedWeight;
use crate::tensor::Matrix;

/// Elementwise closeness bound: `|out - expect| <= atol + rtol * |expect|`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    /// Relative term
    pub rtol: f32,
    /// Absolute term
    pub atol: f32,
}

impl Tolerance {
    /// Tolerance scaled to the output dtype's rounding, with an absolute floor
    /// relative to the largest expected magnitude.
    pub fn for_output<T: Element>(expect: &[f32]) -> Self {
        let rtol = match T::DTYPE {
            crate::dtype::DType::F16 => 2e-3,
            crate::dtype::DType::BF16 => 1e-2,
            crate::dtype::DType::F32 => 1e-5,
        };
        Self {
            rtol,
            atol: rtol * max_abs(expect),
        }
    }

    /// Whether every element of `out` is within bound of `expect`
    pub fn accepts(&self, out: &[f32], expect: &[f32]) -> bool {
        out.len() == expect.len()
            && out
                .iter()
                .zip(expect)
                .all(|(&o, &e)| (o - e).abs() <= self.atol + self.rtol * e.abs())
    }
}

/// `activation [M, K] · dequantize(weight)ᵀ` via scalar lookups, f64 accumulation.
pub fn reference_matmul<T: Element>(
    activation: &Matrix<T>,
    weight: &QuantizedWeight,
) -> Result<Vec<f32>> {
    let (m, k) = activation.shape();
    if k != weight.cols() {
        return Err(Error::InvalidArgument {
            arg: "activation",
            reason: format!("K={k} does not match weight K={}", weight.cols()),
        });
    }
    let n = weight.rows();
    let mut out = vec![0.0f32; m * n];
    for i in 0..m {
        let a_row = activation.row(i);
        for j in 0..n {
            let mut acc = 0.0f64;
            for (kk, a) in a_row.iter().enumerate() {
                acc += a.to_f32() as f64 * weight.dequant_element(j, kk) as f64;
            }
            out[i * n + j] = acc as f32;
        }
    }
    Ok(out)
}

/// Dense `a [M, K] · b [N, K]ᵀ` in f64, for comparing against unquantized weights.
pub fn dense_matmul_nt(a: &[f32], b: &[f32], m: usize, n: usize, k: usize) -> Vec<f32> {
    debug_assert_eq!(a.len(), m * k);
    debug_assert_eq!(b.len(), n * k);
    let mut out = vec![0.0f32; m * n];
    for i in 0..m {
        for j in 0..n {
            let acc: f64 = a[i * k..(i + 1) * k]
                .iter()
                .zip(&b[j * k..(j + 1) * k])
                .map(|(&x, &y)| x as f64 * y as f64)
                .sum();
            out[i * n + j] = acc as f32;
        }
    }
    out
}

/// `‖out − expect‖₂ / ‖expect‖₂` (0 when both are zero)
pub fn relative_error(out: &[f32], expect: &[f32]) -> f32 {
    let (mut num, mut den) = (0.0f64, 0.0f64);
    for (&o, &e) in out.iter().zip(expect) {
        let d = (o - e) as f64;
        num += d * d;
        den += (e as f64) * (e as f64);
    }
    if den == 0.0 {
        return if num == 0.0 { 0.0 } else { f32::INFINITY };
    }
    (num / den).sqrt() as f32
}

/// Fraction of failing cases
pub fn failure_rate<I: IntoIterator<Item = bool>>(passed: I) -> f64 {
    let (mut total, mut failed) = (0usize, 0usize);
    for ok in passed {
        total += 1;
        if !ok {
            failed += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        failed as f64 / total as f64
    }
}

fn max_abs(v: &[f32]) -> f32 {
    v.iter().fold(0.0f32, |m, x| m.max(x.abs()))
}
