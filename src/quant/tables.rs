//! Lookup tables: one representative value per code.
//!
//! A table has exactly `2^bits` entries and is indexed directly by a packed
//! code. Dequantization is `table[code] * group_scale`; the table itself
//! carries no scale.
//!
//! Fixed formats are closed-form and independent of the data being quantized:
//!
//! | mode | entry for code `c` |
//! |------|--------------------|
//! | `int{b}` | `c - 2^(b-1)` (int4 = -8..=7) |
//! | `fp{b}`  | sign-magnitude mini-float, sign in the code MSB, max magnitude 1 |
//! | `nf{b}`  | normal quantiles, exact zero, normalized to [-1, 1] |
//!
//! Calibrated tables are a Lloyd-Max fit of `2^b` levels to a Gaussian
//! reference N(0, sigma) truncated to [-1, 1].

use super::format::BitWidth;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// NF4 table (QLoRA), sorted by code.
pub const NF4_TABLE: [f32; 16] = [
    -1.0,
    -0.696_192_8,
    -0.525_073_05,
    -0.394_917_5,
    -0.284_441_38,
    -0.184_773_43,
    -0.091_050_036,
    0.0,
    0.079_580_3,
    0.160_930_2,
    0.246_112_3,
    0.337_915_24,
    0.440_709_83,
    0.562_617,
    0.722_956_84,
    1.0,
];

/// Probability of the outermost normal-float quantile.
const NF_OFFSET: f64 = 0.967_708_3;

/// E2M1 magnitudes (fp4)
const FP4_MAGNITUDES: [f32; 8] = [0.0, 0.5, 1.0, 1.5, 2.0, 3.0, 4.0, 6.0];
/// E2M0 magnitudes (fp3)
const FP3_MAGNITUDES: [f32; 4] = [0.0, 1.0, 2.0, 4.0];
/// E1M0 magnitudes (fp2)
const FP2_MAGNITUDES: [f32; 2] = [0.0, 1.0];

const CALIBRATION_SAMPLES: usize = 8192;
const LLOYD_MAX_ITERS: usize = 64;
const MIN_SIGMA: f32 = 1e-3;

/// How a table is constructed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TableMode {
    /// Uniform integers, equivalent to a symmetric affine int quantizer
    IntUniform,
    /// Floating-point-like sign/exponent/mantissa mini-format
    FpLike,
    /// Fixed normal-float quantiles
    NormalFloat,
    /// Lloyd-Max fit to N(0, sigma); `None` learns sigma from the weights
    NormalFloatCalibrated {
        /// Spread of the Gaussian reference in group-normalized units
        #[serde(default)]
        sigma: Option<f32>,
    },
}

impl TableMode {
    /// Whether building the table needs the weights being quantized
    pub fn needs_data(self) -> bool {
        matches!(self, Self::NormalFloatCalibrated { sigma: None })
    }
}

impl fmt::Display for TableMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IntUniform => f.write_str("int"),
            Self::FpLike => f.write_str("fp"),
            Self::NormalFloat => f.write_str("nf"),
            Self::NormalFloatCalibrated { sigma: Some(s) } => write!(f, "nf-calibrated(sigma={s})"),
            Self::NormalFloatCalibrated { sigma: None } => f.write_str("nf-calibrated"),
        }
    }
}

/// Immutable `2^bits`-entry table of dequantized representatives
#[derive(Debug, Clone, PartialEq)]
pub struct LookupTable {
    bits: BitWidth,
    mode: TableMode,
    values: Vec<f32>,
}

impl LookupTable {
    /// Build a table that does not depend on the data being quantized.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a calibrated mode without `sigma` (use [`Self::fit`])
    /// or with a non-positive `sigma`.
    pub fn fixed(bits: BitWidth, mode: TableMode) -> Result<Self> {
        match mode {
            TableMode::IntUniform => Ok(Self::int_uniform(bits)),
            TableMode::FpLike => Ok(Self::fp_like(bits)),
            TableMode::NormalFloat => Ok(Self::normal_float(bits)),
            TableMode::NormalFloatCalibrated { sigma: Some(sigma) } => {
                Self::calibrated(bits, sigma)
            }
            TableMode::NormalFloatCalibrated { sigma: None } => Err(Error::InvalidArgument {
                arg: "mode",
                reason: "calibrated table without sigma needs weight samples".into(),
            }),
        }
    }

    /// Build a table for `mode`, learning sigma from `normalized` when needed.
    ///
    /// `normalized` are weights divided by their group's absolute maximum,
    /// so they lie in [-1, 1]. Fixed modes ignore them.
    pub fn fit(bits: BitWidth, mode: TableMode, normalized: &[f32]) -> Result<Self> {
        match mode {
            TableMode::NormalFloatCalibrated { sigma: None } => {
                let sigma = learn_sigma(normalized);
                log::debug!("calibrated {bits} table: learned sigma={sigma:.5}");
                let mut table = Self::calibrated(bits, sigma)?;
                table.mode = TableMode::NormalFloatCalibrated { sigma: Some(sigma) };
                Ok(table)
            }
            other => Self::fixed(bits, other),
        }
    }

    /// `int{b}`: `table[c] = c - 2^(b-1)`
    pub fn int_uniform(bits: BitWidth) -> Self {
        let half = (bits.num_codes() / 2) as f32;
        let values = (0..bits.num_codes()).map(|c| c as f32 - half).collect();
        Self {
            bits,
            mode: TableMode::IntUniform,
            values,
        }
    }

    /// `fp{b}`: sign in the code MSB, magnitude from the low `b-1` bits.
    ///
    /// The negative-zero code aliases +0; nearest-value search never emits it
    /// because ties resolve to the lower code.
    pub fn fp_like(bits: BitWidth) -> Self {
        let magnitudes: &[f32] = match bits {
            BitWidth::B2 => &FP2_MAGNITUDES,
            BitWidth::B3 => &FP3_MAGNITUDES,
            BitWidth::B4 => &FP4_MAGNITUDES,
        };
        let max = magnitudes[magnitudes.len() - 1];
        let values = magnitudes
            .iter()
            .map(|&m| m / max)
            .chain(magnitudes.iter().map(|&m| -(m / max)))
            .collect();
        Self {
            bits,
            mode: TableMode::FpLike,
            values,
        }
    }

    /// `nf{b}`: normal-float quantiles, sorted, with an exact zero.
    pub fn normal_float(bits: BitWidth) -> Self {
        let values = match bits {
            BitWidth::B4 => NF4_TABLE.to_vec(),
            other => normal_float_values(other),
        };
        Self {
            bits,
            mode: TableMode::NormalFloat,
            values,
        }
    }

    /// Lloyd-Max fit to N(0, sigma) truncated to [-1, 1], starting from `nf{b}`.
    ///
    /// Deterministic: the reference distribution is sampled at fixed quantiles.
    pub fn calibrated(bits: BitWidth, sigma: f32) -> Result<Self> {
        if !sigma.is_finite() || sigma <= 0.0 {
            return Err(Error::InvalidArgument {
                arg: "sigma",
                reason: format!("must be finite and positive, got {sigma}"),
            });
        }

        let n = CALIBRATION_SAMPLES;
        let samples: Vec<f32> = (0..n)
            .map(|i| {
                let p = (i as f64 + 0.5) / n as f64;
                ((sigma as f64 * normal_quantile(p)) as f32).clamp(-1.0, 1.0)
            })
            .collect();

        let mut levels = lloyd_max(Self::normal_float(bits).values, &samples);
        let max_abs = levels.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        if max_abs > 0.0 {
            for v in &mut levels {
                *v /= max_abs;
            }
        }

        Ok(Self {
            bits,
            mode: TableMode::NormalFloatCalibrated { sigma: Some(sigma) },
            values: levels,
        })
    }

    /// Reassemble a table from stored values (e.g. a persisted artifact).
    pub fn from_parts(bits: BitWidth, mode: TableMode, values: Vec<f32>) -> Result<Self> {
        if values.len() != bits.num_codes() {
            return Err(Error::InvalidArgument {
                arg: "values",
                reason: format!(
                    "{bits} table needs {} entries, got {}",
                    bits.num_codes(),
                    values.len()
                ),
            });
        }
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(Error::InvalidArgument {
                arg: "values",
                reason: format!("table entries must be finite, found {bad}"),
            });
        }
        Ok(Self { bits, mode, values })
    }

    /// Code width this table is indexed by
    pub fn bits(&self) -> BitWidth {
        self.bits
    }

    /// Construction mode
    pub fn mode(&self) -> TableMode {
        self.mode
    }

    /// All entries, indexed by code
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Number of entries (`2^bits`)
    pub fn num_codes(&self) -> usize {
        self.values.len()
    }

    /// Entry for `code`
    #[inline(always)]
    pub fn get(&self, code: u8) -> f32 {
        self.values[code as usize]
    }

    /// Largest entry
    pub fn max_value(&self) -> f32 {
        self.values.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    /// Smallest entry
    pub fn min_value(&self) -> f32 {
        self.values.iter().copied().fold(f32::INFINITY, f32::min)
    }

    /// Code of the entry nearest to `x`; ties go to the lower code.
    pub fn nearest(&self, x: f32) -> u8 {
        let mut best_idx = 0u8;
        let mut best_dist = f32::INFINITY;
        for (i, &val) in self.values.iter().enumerate() {
            let dist = (x - val).abs();
            if dist < best_dist {
                best_dist = dist;
                best_idx = i as u8;
            }
        }
        best_idx
    }

    /// Write the entries into a fixed 16-slot array, the form kernels stage
    /// into local memory. Unused slots stay zero.
    pub fn to_array(&self) -> [f32; 16] {
        let mut out = [0.0f32; 16];
        out[..self.values.len()].copy_from_slice(&self.values);
        out
    }
}

/// RMS of group-normalized weights, clamped to a usable spread.
pub fn learn_sigma(normalized: &[f32]) -> f32 {
    if normalized.is_empty() {
        return 1.0;
    }
    let sum_sq: f64 = normalized.iter().map(|&v| (v as f64) * (v as f64)).sum();
    let rms = (sum_sq / normalized.len() as f64).sqrt() as f32;
    rms.clamp(MIN_SIGMA, 1.0)
}

/// `2^(b-1)` positive and `2^(b-1) - 1` negative quantiles plus zero.
fn normal_float_values(bits: BitWidth) -> Vec<f32> {
    let num_pos = bits.num_codes() / 2;
    let num_neg = num_pos - 1;

    // linspace(offset, 0.5, count + 1) without the final 0.5
    let quantiles = |count: usize| -> Vec<f64> {
        (0..count)
            .map(|i| {
                let p = NF_OFFSET + (0.5 - NF_OFFSET) * i as f64 / count as f64;
                normal_quantile(p)
            })
            .collect()
    };

    let mut v: Vec<f64> = quantiles(num_pos);
    v.extend(quantiles(num_neg).into_iter().map(|q| -q));
    v.push(0.0);
    v.sort_by(|a, b| a.total_cmp(b));

    let max = v.iter().copied().fold(0.0f64, f64::max);
    v.into_iter().map(|x| (x / max) as f32).collect()
}

/// One-dimensional Lloyd-Max over ascending `samples`.
fn lloyd_max(mut levels: Vec<f32>, samples: &[f32]) -> Vec<f32> {
    let k = levels.len();
    let mut sums = vec![0.0f64; k];
    let mut counts = vec![0usize; k];

    for _ in 0..LLOYD_MAX_ITERS {
        sums.fill(0.0);
        counts.fill(0);

        let mut cell = 0;
        for &x in samples {
            while cell + 1 < k && x > 0.5 * (levels[cell] + levels[cell + 1]) {
                cell += 1;
            }
            sums[cell] += x as f64;
            counts[cell] += 1;
        }

        let mut moved = 0.0f32;
        for i in 0..k {
            if counts[i] > 0 {
                let centroid = (sums[i] / counts[i] as f64) as f32;
                moved = moved.max((centroid - levels[i]).abs());
                levels[i] = centroid;
            }
        }
        if moved < 1e-7 {
            break;
        }
    }
    levels
}

/// Inverse standard normal CDF (Acklam), relative error below 1.2e-9.
pub(crate) fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.02425;

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p <= 0.0 {
        f64::NEG_INFINITY
    } else if p >= 1.0 {
        f64::INFINITY
    } else if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}
