//! Host client

use std::sync::Arc;

use log::info;

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::quant::dispatch::MatmulOptions;
use crate::quant::registry::{GpuArch, KernelRegistry};

/// Host backend: runs the tile executor on rayon workers
#[derive(Debug, Clone)]
pub struct CpuClient {
    registry: Arc<KernelRegistry>,
    config: RuntimeConfig,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl CpuClient {
    /// Client with default configuration and the built-in registry
    pub fn new() -> Result<Self> {
        Self::with_config(RuntimeConfig::default())
    }

    /// Client configured from `LUTR_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::with_config(RuntimeConfig::from_env()?)
    }

    /// Client with an explicit configuration.
    pub fn with_config(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        let registry = super::load_registry(&config)?;
        let pool = match config.num_threads {
            Some(n) => Some(Arc::new(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("lutr-worker-{i}"))
                    .build()
                    .map_err(|e| Error::ConfigError {
                        reason: format!("failed to build worker pool: {e}"),
                    })?,
            )),
            None => None,
        };
        info!(
            "host client: {} registry entries, {} workers",
            registry.len(),
            pool.as_ref()
                .map_or_else(rayon::current_num_threads, |p| p.current_num_threads())
        );
        Ok(Self {
            registry: Arc::new(registry),
            config,
            pool,
        })
    }

    /// Replace the registry (e.g. a hand-built one in tests)
    pub fn with_registry(mut self, registry: KernelRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
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

    /// Target reported to the registry
    pub fn arch(&self) -> GpuArch {
        GpuArch::Host
    }

    /// Run `f` on this client's worker pool.
    pub(crate) fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }
}
