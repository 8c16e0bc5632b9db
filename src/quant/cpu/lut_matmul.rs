//! CPU implementation of LutMatmulOps

use crate::dtype::Element;
use crate::error::Result;
use crate::quant::QuantizedWeight;
use crate::quant::dispatch::DispatchPlan;
use crate::quant::registry::{GpuArch, KernelRegistry};
use crate::quant::traits::LutMatmulOps;
use crate::quant::traits::lut_matmul::{validate_operands, validate_plan};
use crate::runtime::CpuClient;
use crate::tensor::Matrix;

use super::kernels::lut_gemm;

impl LutMatmulOps for CpuClient {
    fn arch(&self) -> GpuArch {
        GpuArch::Host
    }

    fn registry(&self) -> &KernelRegistry {
        self.kernel_registry()
    }

    fn execute<T: Element>(
        &self,
        activation: &Matrix<T>,
        weight: &QuantizedWeight,
        plan: &DispatchPlan,
    ) -> Result<Matrix<T>> {
        validate_operands(activation, weight)?;
        validate_plan::<T>(plan)?;
        let m = activation.rows();
        let out = self.install(|| lut_gemm::lut_gemm(activation.as_slice(), m, weight, &plan.config));
        Matrix::from_vec(out, m, weight.rows())
    }
}
