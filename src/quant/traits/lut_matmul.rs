//! LUT-quantized matmul operations trait

use crate::dtype::Element;
use crate::error::{Error, Result};
use crate::quant::dispatch::{self, DispatchPlan, MatmulOptions};
use crate::quant::registry::{GpuArch, KernelRegistry};
use crate::quant::QuantizedWeight;
use crate::tensor::Matrix;

/// Mixed-precision matmul: dense activation × LUT-quantized weight
///
/// This is the hot path of quantized inference. The weight stays packed and
/// is dequantized on the fly inside the multiply; the dense weight is never
/// materialized.
///
/// # Contract
///
/// - `activation` shape: `[M, K]`, dtype f16 or bf16
/// - `weight` shape: `[N, K]` (groups along K), used as the K×N operand
/// - Output shape: `[M, N]` with the activation's dtype, accumulated in f32
///
/// The result matches `activation · dequantize(weight)ᵀ` within f32
/// accumulation tolerance. With split-K active the result is numerically
/// close but not bit-reproducible across calls.
pub trait LutMatmulOps {
    /// Architecture kernels are selected for
    fn arch(&self) -> GpuArch;

    /// Registry consulted when no explicit configuration is given
    fn registry(&self) -> &KernelRegistry;

    /// Run an already planned call.
    fn execute<T: Element>(
        &self,
        activation: &Matrix<T>,
        weight: &QuantizedWeight,
        plan: &DispatchPlan,
    ) -> Result<Matrix<T>>;

    /// Validate the call and choose its configuration.
    fn plan<T: Element>(
        &self,
        activation: &Matrix<T>,
        weight: &QuantizedWeight,
        options: &MatmulOptions,
    ) -> Result<DispatchPlan> {
        validate_operands(activation, weight)?;
        let key = dispatch::config_key(T::DTYPE, activation.rows(), weight, self.arch(), options.tp);
        dispatch::plan(self.registry(), key, options)
    }

    /// `activation [M, K] × weight [N, K]ᵀ → [M, N]`
    fn lut_matmul<T: Element>(
        &self,
        activation: &Matrix<T>,
        weight: &QuantizedWeight,
        options: &MatmulOptions,
    ) -> Result<Matrix<T>> {
        let plan = self.plan(activation, weight, options)?;
        self.execute(activation, weight, &plan)
    }

    /// Same activation × several quantized weights (e.g. fused Q/K/V).
    ///
    /// Default implementation just loops; fails on the first error with no
    /// partial results.
    fn lut_matmul_batch<T: Element>(
        &self,
        activation: &Matrix<T>,
        weights: &[&QuantizedWeight],
        options: &MatmulOptions,
    ) -> Result<Vec<Matrix<T>>> {
        weights
            .iter()
            .map(|w| self.lut_matmul(activation, w, options))
            .collect()
    }
}

/// Shape and dtype checks shared by every backend.
pub fn validate_operands<T: Element>(activation: &Matrix<T>, weight: &QuantizedWeight) -> Result<()> {
    validate_activation(activation, weight.shape())
}

/// Checks `activation [M, K]` against a weight of shape `[N, K]`.
pub fn validate_activation<T: Element>(
    activation: &Matrix<T>,
    (n, k): (usize, usize),
) -> Result<()> {
    if !T::DTYPE.is_activation() {
        return Err(Error::InvalidArgument {
            arg: "activation",
            reason: format!("activation must be f16 or bf16, got {}", T::DTYPE),
        });
    }
    if activation.rows() == 0 {
        return Err(Error::InvalidArgument {
            arg: "activation",
            reason: "activation has no rows".into(),
        });
    }
    if activation.cols() != k {
        return Err(Error::InvalidArgument {
            arg: "activation",
            reason: format!(
                "activation K={} does not match weight [{n}, {k}]",
                activation.cols()
            ),
        });
    }
    Ok(())
}

/// Tile constraints and dtype agreement of a plan about to run.
///
/// Plans may be edited after [`dispatch::plan`] returns them.
pub fn validate_plan<T: Element>(plan: &DispatchPlan) -> Result<()> {
    plan.config.validate()?;
    if plan.config.dtype != T::DTYPE {
        return Err(Error::DTypeMismatch {
            expected: T::DTYPE,
            got: plan.config.dtype,
        });
    }
    Ok(())
}
