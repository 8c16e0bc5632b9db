//! Per-invocation kernel selection
//!
//! Every matmul call is planned before launch: the exact registry key is built
//! from the call, a configuration is chosen (explicit, tuned, or the generic
//! fallback the caller opted into), dtype agreement is checked, split-K is
//! dropped in deterministic mode, and known limitations are attached as
//! advisories.

use log::{debug, warn};

use crate::config::RuntimeConfig;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::quant::registry::{
    Advisory, ConfigKey, GpuArch, KernelConfig, KernelRegistry, PerfTier,
};
use crate::quant::tensor::QuantizedWeight;

/// Caller options for one matmul
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatmulOptions {
    /// Use this configuration instead of consulting the registry
    pub config: Option<KernelConfig>,
    /// On a registry miss, run [`KernelConfig::generic`] instead of failing
    pub allow_generic: bool,
    /// Force `split_k = 1` so repeated calls are bit-identical
    pub deterministic: bool,
    /// Tensor-parallel degree of the layer (part of the registry key)
    pub tp: usize,
}

impl Default for MatmulOptions {
    fn default() -> Self {
        Self {
            config: None,
            allow_generic: false,
            deterministic: false,
            tp: 1,
        }
    }
}

impl MatmulOptions {
    /// Defaults taken from a runtime configuration
    pub fn from_runtime(config: &RuntimeConfig) -> Self {
        Self {
            allow_generic: config.allow_generic,
            deterministic: config.deterministic,
            ..Self::default()
        }
    }

    /// Pin the launch configuration
    pub fn with_config(mut self, config: KernelConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Opt in or out of the generic fallback
    pub fn allow_generic(mut self, allow: bool) -> Self {
        self.allow_generic = allow;
        self
    }

    /// Enable or disable deterministic mode
    pub fn deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    /// Set the tensor-parallel degree
    pub fn with_tp(mut self, tp: usize) -> Self {
        self.tp = tp;
        self
    }
}

/// Where the launch configuration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Supplied by the caller
    Explicit,
    /// Exact registry hit
    Tuned,
    /// Caller-approved untuned fallback
    Generic,
}

/// Resolved launch decision for one call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchPlan {
    /// Registry key of the call
    pub key: ConfigKey,
    /// Configuration that will run
    pub config: KernelConfig,
    /// Origin of `config`
    pub source: ConfigSource,
    /// Registry performance annotation, when the key is registered
    pub perf: Option<PerfTier>,
    /// Known limitation for this key
    pub advisory: Option<Advisory>,
}

/// Build the registry key for `activation[m, K] × weight`.
pub fn config_key(
    dtype: DType,
    m: usize,
    weight: &QuantizedWeight,
    arch: GpuArch,
    tp: usize,
) -> ConfigKey {
    ConfigKey {
        dtype,
        bits: weight.bits(),
        group_size: weight.group_size(),
        m,
        n: weight.rows(),
        k: weight.cols(),
        arch,
        tp,
    }
}

/// Select the configuration for `key`.
///
/// # Errors
///
/// - `UnsupportedShape` on a registry miss without an explicit config or the
///   generic opt-in
/// - `DTypeMismatch` if the chosen config was built for another dtype
/// - `ConfigError` for an invalid explicit config
/// - `InvalidArgument` for `tp == 0`
pub fn plan(registry: &KernelRegistry, key: ConfigKey, options: &MatmulOptions) -> Result<DispatchPlan> {
    if options.tp == 0 {
        return Err(Error::InvalidArgument {
            arg: "tp",
            reason: "tensor-parallel degree must be at least 1".into(),
        });
    }

    let (mut config, source, perf) = match options.config {
        Some(config) => {
            config.validate()?;
            (config, ConfigSource::Explicit, registry.get(&key).map(|e| e.perf))
        }
        None => match registry.lookup(&key) {
            Ok(entry) => (entry.config, ConfigSource::Tuned, Some(entry.perf)),
            Err(Error::UnsupportedShape { .. }) if options.allow_generic => {
                warn!("no tuned kernel configuration for {key}; running generic configuration");
                (
                    KernelConfig::generic(key.dtype, key.arch),
                    ConfigSource::Generic,
                    None,
                )
            }
            Err(e) => return Err(e),
        },
    };

    if config.dtype != key.dtype {
        return Err(Error::DTypeMismatch {
            expected: config.dtype,
            got: key.dtype,
        });
    }
    if config.arch != key.arch {
        warn!(
            "configuration tuned for {} running on {}",
            config.arch, key.arch
        );
    }
    if options.deterministic && config.is_split() {
        debug!("deterministic mode: split_k {} -> 1 for {key}", config.split_k);
        config = config.without_split_k();
    }

    let advisory = KernelRegistry::known_instability(&key);
    if let Some(advisory) = &advisory {
        warn!("{advisory}");
    }

    debug!("dispatch {key}: {source:?} {config:?}");
    Ok(DispatchPlan {
        key,
        config,
        source,
        perf,
        advisory,
    })
}
