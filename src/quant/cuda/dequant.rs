//! CUDA implementation of DequantOps

use cudarc::driver::PushKernelArg;
use cudarc::driver::safe::LaunchConfig;

use crate::dtype::Element;
use crate::error::Result;
use crate::quant::QuantizedWeight;
use crate::quant::traits::DequantOps;
use crate::runtime::CudaClient;
use crate::tensor::Matrix;

use super::kernels::{self, LUT_GEMM_MODULE};
use super::lut_gemm::{DeviceWeight, device_err};

/// Dequantize a resident weight to a dense f32 `[N, K]` buffer.
pub fn launch_dequant(client: &CudaClient, weight: &DeviceWeight) -> Result<Vec<f32>> {
    let stream = client.stream();
    let count = weight.rows * weight.cols;
    let mut out = stream.alloc_zeros::<f32>(count).map_err(device_err("output alloc"))?;

    let module = kernels::get_or_load_module(client.context(), client.ordinal(), LUT_GEMM_MODULE)?;
    let func = kernels::get_kernel_function(&module, &format!("lut_dequant_b{}", weight.bits.bits()))?;

    let cfg = LaunchConfig {
        grid_dim: ((count as u32).div_ceil(256), 1, 1),
        block_dim: (256, 1, 1),
        shared_mem_bytes: 0,
    };
    let (n, k, g) = (weight.rows as u32, weight.cols as u32, weight.group_size.get() as u32);

    unsafe {
        let mut builder = stream.launch_builder(&func);
        builder.arg(&weight.codes);
        builder.arg(&weight.scales);
        builder.arg(&weight.table);
        builder.arg(&mut out);
        builder.arg(&n);
        builder.arg(&k);
        builder.arg(&g);
        builder.launch(cfg).map_err(device_err("lut_dequant launch"))?;
    }

    stream.memcpy_dtov(&out).map_err(device_err("download output"))
}

impl DequantOps for CudaClient {
    fn dequantize<T: Element>(&self, weight: &QuantizedWeight) -> Result<Matrix<T>> {
        let device = DeviceWeight::upload(self, weight)?;
        let dense = launch_dequant(self, &device)?;
        Matrix::from_f32(&dense, weight.rows(), weight.cols())
    }
}
