//! CUDA LUT GEMM dispatch
//!
//! Weights are uploaded as three flat buffers (packed code words, group
//! scales, table). The fused kernel writes f32 partial sums into a zeroed
//! workspace, and a finalize kernel narrows the workspace to the activation
//! dtype.

use cudarc::driver::PushKernelArg;
use cudarc::driver::safe::{CudaSlice, LaunchConfig};
use log::trace;

use crate::dtype::Element;
use crate::error::{Error, Result};
use crate::quant::QuantizedWeight;
use crate::quant::cpu::kernels::lut_gemm::k_partitions;
use crate::quant::dispatch::{self, DispatchPlan, MatmulOptions};
use crate::quant::format::{BitWidth, GroupSize};
use crate::quant::registry::{ConfigKey, GpuArch, KernelConfig, KernelRegistry};
use crate::quant::traits::LutMatmulOps;
use crate::quant::traits::lut_matmul::{validate_activation, validate_operands, validate_plan};
use crate::runtime::CudaClient;
use crate::tensor::Matrix;

use super::kernels::{self, LUT_GEMM_MODULE};

/// Largest `tile_m` the kernel keeps in registers
pub const MAX_TILE_M: usize = 16;

/// Quantized weight resident on one device
///
/// Upload once with [`DeviceWeight::upload`] and pass to
/// [`CudaClient::lut_matmul_resident`] for every call; the buffers are never
/// written after upload. Only valid with the client that uploaded it.
pub struct DeviceWeight {
    pub(crate) codes: CudaSlice<u32>,
    pub(crate) scales: CudaSlice<f32>,
    pub(crate) table: CudaSlice<f32>,
    pub(crate) bits: BitWidth,
    pub(crate) rows: usize,
    pub(crate) cols: usize,
    pub(crate) group_size: GroupSize,
}

impl DeviceWeight {
    /// Copy `weight` to the client's device.
    pub fn upload(client: &CudaClient, weight: &QuantizedWeight) -> Result<Self> {
        let stream = client.stream();
        let codes = stream
            .memcpy_stod(weight.codes().words())
            .map_err(device_err("upload codes"))?;
        let scales = stream
            .memcpy_stod(weight.scales())
            .map_err(device_err("upload scales"))?;
        let table = stream
            .memcpy_stod(weight.table().values())
            .map_err(device_err("upload table"))?;
        Ok(Self {
            codes,
            scales,
            table,
            bits: weight.bits(),
            rows: weight.rows(),
            cols: weight.cols(),
            group_size: weight.group_size(),
        })
    }

    /// `(N, K)`
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn bits(&self) -> BitWidth {
        self.bits
    }

    pub fn group_size(&self) -> GroupSize {
        self.group_size
    }
}

/// Dynamic shared memory available without an opt-in attribute
pub const MAX_SHARED_BYTES: usize = 48 * 1024;

/// Per-block shared memory: LUT, activation tile, and one code tile per thread.
pub fn shared_mem_bytes(bits: BitWidth, tile_m: usize, tile_k: usize, threads: usize) -> usize {
    let lut = bits.num_codes() * std::mem::size_of::<f32>();
    let a_tile = tile_m * tile_k * std::mem::size_of::<f32>();
    let code_tile = threads * (tile_k * bits.bits() as usize / 32) * std::mem::size_of::<u32>();
    lut + a_tile + code_tile
}

pub(crate) fn device_err<E: std::fmt::Debug>(what: &'static str) -> impl Fn(E) -> Error {
    move |e| Error::DeviceError {
        reason: format!("CUDA {what} failed: {e:?}"),
    }
}

fn check_launchable(config: &KernelConfig) -> Result<()> {
    config.validate()?;
    if config.tile_m > MAX_TILE_M || config.tile_n == 0 || config.tile_n > 1024 {
        return Err(Error::ConfigError {
            reason: format!(
                "CUDA kernel needs tile_m <= {MAX_TILE_M} and 0 < tile_n <= 1024, got {}x{}",
                config.tile_m, config.tile_n
            ),
        });
    }
    Ok(())
}

/// Launch the fused kernel for `activation [M, K] × weight` and return `[M, N]`.
pub fn launch_lut_gemm<T: Element>(
    client: &CudaClient,
    activation: &Matrix<T>,
    weight: &DeviceWeight,
    config: &KernelConfig,
) -> Result<Vec<T>> {
    check_launchable(config)?;
    let (m, k) = activation.shape();
    let n = weight.rows;
    let stream = client.stream();

    let act_bits: &[u16] = bytemuck::try_cast_slice(activation.as_slice())
        .map_err(device_err("activation reinterpret"))?;
    let act = stream.memcpy_stod(act_bits).map_err(device_err("upload activation"))?;
    let mut acc = stream
        .alloc_zeros::<f32>(m * n)
        .map_err(device_err("workspace alloc"))?;
    let mut out = stream.alloc_zeros::<u16>(m * n).map_err(device_err("output alloc"))?;

    let module = kernels::get_or_load_module(client.context(), client.ordinal(), LUT_GEMM_MODULE)?;
    let func = kernels::get_kernel_function(
        &module,
        &kernels::lut_gemm_kernel_name(T::DTYPE, weight.bits.bits()),
    )?;

    let tile_m = config.tile_m.min(m).max(1);
    let parts = k_partitions(k, config.split_k);
    let k_chunk = parts.first().map_or(k, |p| p.len());
    let block = config.tile_n.max(32) as u32;
    let shared = shared_mem_bytes(weight.bits, tile_m, config.tile_k, block as usize);
    if shared > MAX_SHARED_BYTES {
        return Err(Error::ConfigError {
            reason: format!(
                "config needs {shared} bytes of shared memory, limit is {MAX_SHARED_BYTES}"
            ),
        });
    }
    let cfg = LaunchConfig {
        grid_dim: (
            n.div_ceil(block as usize) as u32,
            m.div_ceil(tile_m) as u32,
            parts.len() as u32,
        ),
        block_dim: (block, 1, 1),
        shared_mem_bytes: shared as u32,
    };
    trace!("cuda lut_gemm: m={m} n={n} k={k} {cfg:?}");

    let (m32, n32, k32) = (m as u32, n as u32, k as u32);
    let group_size = weight.group_size.get() as u32;
    let tile_m32 = tile_m as u32;
    let tile_k = config.tile_k as u32;
    let k_chunk = k_chunk as u32;
    let split = parts.len() as u32;

    unsafe {
        let mut builder = stream.launch_builder(&func);
        builder.arg(&act);
        builder.arg(&weight.codes);
        builder.arg(&weight.scales);
        builder.arg(&weight.table);
        builder.arg(&mut acc);
        builder.arg(&m32);
        builder.arg(&n32);
        builder.arg(&k32);
        builder.arg(&group_size);
        builder.arg(&tile_m32);
        builder.arg(&tile_k);
        builder.arg(&k_chunk);
        builder.arg(&split);
        builder.launch(cfg).map_err(device_err("lut_gemm launch"))?;
    }

    let finalize = kernels::get_kernel_function(
        &module,
        &format!("lut_gemm_finalize_{}", T::DTYPE.name()),
    )?;
    let count = (m * n) as u32;
    let fin_cfg = LaunchConfig {
        grid_dim: (count.div_ceil(256), 1, 1),
        block_dim: (256, 1, 1),
        shared_mem_bytes: 0,
    };
    unsafe {
        let mut builder = stream.launch_builder(&finalize);
        builder.arg(&acc);
        builder.arg(&mut out);
        builder.arg(&count);
        builder.launch(fin_cfg).map_err(device_err("finalize launch"))?;
    }

    let host = stream.memcpy_dtov(&out).map_err(device_err("download output"))?;
    let values: &[T] = bytemuck::try_cast_slice(&host).map_err(device_err("output reinterpret"))?;
    Ok(values.to_vec())
}

impl LutMatmulOps for CudaClient {
    fn arch(&self) -> GpuArch {
        self.gpu_arch()
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
        let device = DeviceWeight::upload(self, weight)?;
        let out = launch_lut_gemm(self, activation, &device, &plan.config)?;
        Matrix::from_vec(out, activation.rows(), weight.rows())
    }
}

impl CudaClient {
    /// Plan for a weight already resident on this device.
    pub fn plan_resident<T: Element>(
        &self,
        activation: &Matrix<T>,
        weight: &DeviceWeight,
        options: &MatmulOptions,
    ) -> Result<DispatchPlan> {
        validate_activation(activation, weight.shape())?;
        let key = ConfigKey {
            dtype: T::DTYPE,
            bits: weight.bits,
            group_size: weight.group_size,
            m: activation.rows(),
            n: weight.rows,
            k: weight.cols,
            arch: self.gpu_arch(),
            tp: options.tp,
        };
        dispatch::plan(self.kernel_registry(), key, options)
    }

    /// [`LutMatmulOps::lut_matmul`] without re-uploading the weight.
    pub fn lut_matmul_resident<T: Element>(
        &self,
        activation: &Matrix<T>,
        weight: &DeviceWeight,
        options: &MatmulOptions,
    ) -> Result<Matrix<T>> {
        let plan = self.plan_resident(activation, weight, options)?;
        validate_plan::<T>(&plan)?;
        let out = launch_lut_gemm(self, activation, weight, &plan.config)?;
        Matrix::from_vec(out, activation.rows(), weight.rows)
    }
}
