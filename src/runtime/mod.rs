//! Backend clients
//!
//! A client owns what every launch needs: the kernel registry, the runtime
//! configuration and the execution resources of its backend. Operation traits
//! from [`crate::quant::traits`] are implemented on the clients.

pub mod cpu;
#[cfg(feature = "cuda")]
pub mod cuda;

pub use cpu::CpuClient;
#[cfg(feature = "cuda")]
pub use cuda::CudaClient;

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::quant::registry::KernelRegistry;

/// Built-in registry with the configured extra table merged over it.
pub(crate) fn load_registry(config: &RuntimeConfig) -> Result<KernelRegistry> {
    let mut registry = KernelRegistry::builtin()?;
    if let Some(path) = &config.registry_path {
        let extra = KernelRegistry::from_json_file(path)?;
        log::info!(
            "merging {} registry entries from {}",
            extra.len(),
            path.display()
        );
        registry.merge(extra);
    }
    Ok(registry)
}
