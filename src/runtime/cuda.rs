//! CUDA client

use std::sync::Arc;

use cudarc::driver::safe::{CudaContext, CudaStream};
use cudarc::driver::sys::CUdevice_attribute;
use log::info;

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::quant::dispatch::MatmulOptions;
use crate::quant::registry::{GpuArch, KernelRegistry};

/// CUDA backend bound to one device and its default stream
#[derive(Debug, Clone)]
pub struct CudaClient {
    context: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    ordinal: usize,
    arch: GpuArch,
    registry: Arc<KernelRegistry>,
    config: RuntimeConfig,
}

impl CudaClient {
    /// Client for device `ordinal` with default configuration.
    pub fn new(ordinal: usize) -> Result<Self> {
        Self::with_config(ordinal, RuntimeConfig::default())
    }

    /// Client for device `ordinal`.
    ///
    /// Fails with `DeviceError` when the device's compute capability is not
    /// one the kernels are tuned for (sm_80, sm_86, sm_89, sm_90).
    pub fn with_config(ordinal: usize, config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        let context = CudaContext::new(ordinal).map_err(|e| Error::DeviceError {
            reason: format!("failed to open CUDA device {ordinal}: {e:?}"),
        })?;
        let attr = |a| {
            context.attribute(a).map_err(|e| Error::DeviceError {
                reason: format!("failed to query device {ordinal}: {e:?}"),
            })
        };
        let major = attr(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)?;
        let minor = attr(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)?;
        let arch = GpuArch::from_compute_capability(major as u32, minor as u32).ok_or_else(|| {
            Error::DeviceError {
                reason: format!("unsupported compute capability {major}.{minor}"),
            }
        })?;

        let registry = super::load_registry(&config)?;
        info!(
            "cuda client: device {ordinal} ({arch}), {} registry entries",
            registry.len()
        );
        let stream = context.default_stream();
        Ok(Self {
            context,
            stream,
            ordinal,
            arch,
            registry: Arc::new(registry),
            config,
        })
    }

    /// Replace the registry
    pub fn with_registry(mut self, registry: KernelRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Driver context
    pub fn context(&self) -> &Arc<CudaContext> {
        &self.context
    }

    /// Stream all launches are queued on
    pub fn stream(&self) -> &Arc<CudaStream> {
        &self.stream
    }

    /// Device ordinal
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Architecture of the device
    pub fn gpu_arch(&self) -> GpuArch {
        self.arch
    }

    /// Registry in use
    pub fn kernel_registry(&self) -> &KernelRegistry {
        &self.registry
    }

    /// Runtime configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Per-call options seeded from the runtime configuration
    pub fn default_options(&self) -> MatmulOptions {
        MatmulOptions::from_runtime(&self.config)
    }
}
