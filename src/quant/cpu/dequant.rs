//! CPU implementation of DequantOps

use crate::dtype::Element;
use crate::error::Result;
use crate::quant::QuantizedWeight;
use crate::quant::traits::DequantOps;
use crate::runtime::CpuClient;
use crate::tensor::Matrix;

use super::kernels::dequant;

impl DequantOps for CpuClient {
    fn dequantize<T: Element>(&self, weight: &QuantizedWeight) -> Result<Matrix<T>> {
        let data = self.install(|| dequant::dequant_rows::<T>(weight));
        Matrix::from_vec(data, weight.rows(), weight.cols())
    }
}
