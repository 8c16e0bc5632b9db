//! Runtime configuration
//!
//! Controls how backend clients dispatch: extra registry tables, the generic
//! fallback opt-in, deterministic mode and the host worker count. Loadable from
//! JSON (every field optional) or from `LUTR_*` environment variables.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable naming an extra registry JSON file
pub const ENV_REGISTRY: &str = "LUTR_REGISTRY";
/// Environment variable enabling the generic fallback (`1`/`true`)
pub const ENV_ALLOW_GENERIC: &str = "LUTR_ALLOW_GENERIC";
/// Environment variable disabling split-K (`1`/`true`)
pub const ENV_DETERMINISTIC: &str = "LUTR_DETERMINISTIC";
/// Environment variable sizing the host worker pool
pub const ENV_NUM_THREADS: &str = "LUTR_NUM_THREADS";

/// Dispatch defaults for a backend client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Registry table merged over the built-in one
    pub registry_path: Option<PathBuf>,
    /// Run untuned shapes with the generic configuration instead of failing
    pub allow_generic: bool,
    /// Disable split-K so repeated calls are bit-identical
    pub deterministic: bool,
    /// Host worker threads; `None` uses the global rayon pool
    pub num_threads: Option<usize>,
}

impl RuntimeConfig {
    /// Parse from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::ConfigError {
            reason: format!("runtime config parse error: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `LUTR_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = get(ENV_REGISTRY).filter(|p| !p.is_empty()) {
            config.registry_path = Some(PathBuf::from(path));
        }
        if let Some(v) = get(ENV_ALLOW_GENERIC) {
            config.allow_generic = parse_flag(ENV_ALLOW_GENERIC, &v)?;
        }
        if let Some(v) = get(ENV_DETERMINISTIC) {
            config.deterministic = parse_flag(ENV_DETERMINISTIC, &v)?;
        }
        if let Some(v) = get(ENV_NUM_THREADS) {
            let n = v.trim().parse::<usize>().map_err(|e| Error::ConfigError {
                reason: format!("{ENV_NUM_THREADS}={v}: {e}"),
            })?;
            config.num_threads = Some(n);
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.num_threads == Some(0) {
            return Err(Error::ConfigError {
                reason: "num_threads must be at least 1".into(),
            });
        }
        Ok(())
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(Error::ConfigError {
            reason: format!("{name}={other}: expected a boolean"),
        }),
    }
}
