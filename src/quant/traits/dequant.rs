//! Dequantization operations trait

use crate::dtype::Element;
use crate::error::Result;
use crate::quant::QuantizedWeight;
use crate::tensor::Matrix;

/// Materialize a quantized weight as a dense matrix
pub trait DequantOps {
    /// Dequantize to a dense `[N, K]` matrix of `T`.
    ///
    /// Every element is `table[code] * scale` computed in f32, then rounded
    /// to `T`; bit-identical to [`QuantizedWeight::dequantize`] for `T = f32`.
    fn dequantize<T: Element>(&self, weight: &QuantizedWeight) -> Result<Matrix<T>>;
}
