//! Shape-specialized kernel configuration registry
//!
//! A closed enumeration of pre-tuned tile configurations keyed by the exact
//! invocation tuple `(dtype, bits, group_size, M, N, K, arch, tp)`. Lookup is
//! exact-match only: a miss is `UnsupportedShape`, never an interpolated or
//! "closest" configuration. Callers that want to run an untuned shape must ask
//! for [`KernelConfig::generic`] themselves.
//!
//! The built-in table ships as `configs/tuned_configs.json`; further tables can
//! be merged from JSON files with the same schema:
//!
//! ```json
//! { "version": 1,
//!   "entries": [
//!     { "dtype": "f16", "bits": 4, "group_size": 64,
//!       "m": 1, "n": 4096, "k": 4096, "arch": "sm_80", "tp": 1,
//!       "tile_m": 16, "tile_n": 128, "tile_k": 64, "split_k": 1,
//!       "perf": "primary" } ] }
//! ```

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::quant::format::{BitWidth, GroupSize};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Registry schema version understood by this build
pub const REGISTRY_VERSION: u32 = 1;

/// Measured failure rate of (4-bit, group 256, sm_80) against the reference.
pub const SM80_G256_FAILURE_RATE: f64 = 0.0009;

const BUILTIN_TABLE: &str = include_str!("../../configs/tuned_configs.json");

/// Execution target of a kernel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GpuArch {
    /// Ampere datacenter (A100)
    #[serde(rename = "sm_80")]
    Sm80,
    /// Ampere workstation (A6000, RTX 30xx)
    #[serde(rename = "sm_86")]
    Sm86,
    /// Ada (L40, RTX 40xx)
    #[serde(rename = "sm_89")]
    Sm89,
    /// Hopper (H100)
    #[serde(rename = "sm_90")]
    Sm90,
    /// Host tile executor
    #[serde(rename = "host")]
    Host,
}

impl GpuArch {
    /// Map a CUDA compute capability to a tuned architecture.
    pub fn from_compute_capability(major: u32, minor: u32) -> Option<Self> {
        match (major, minor) {
            (8, 0) => Some(Self::Sm80),
            (8, 6) => Some(Self::Sm86),
            (8, 9) => Some(Self::Sm89),
            (9, 0) => Some(Self::Sm90),
            _ => None,
        }
    }

    /// Registry spelling
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sm80 => "sm_80",
            Self::Sm86 => "sm_86",
            Self::Sm89 => "sm_89",
            Self::Sm90 => "sm_90",
            Self::Host => "host",
        }
    }
}

impl fmt::Display for GpuArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Exact invocation tuple the registry is keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfigKey {
    /// Activation dtype
    pub dtype: DType,
    /// Code width
    pub bits: BitWidth,
    /// Scale group size
    pub group_size: GroupSize,
    /// Activation rows
    pub m: usize,
    /// Output features
    pub n: usize,
    /// Reduction length
    pub k: usize,
    /// Target architecture
    pub arch: GpuArch,
    /// Tensor-parallel degree the layer was sharded with
    pub tp: usize,
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{} m={} n={} k={} {} tp={}",
            self.dtype, self.bits, self.group_size, self.m, self.n, self.k, self.arch, self.tp
        )
    }
}

/// Tile/thread configuration for one kernel launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Activation rows per tile
    pub tile_m: usize,
    /// Output features per tile
    pub tile_n: usize,
    /// Reduction step per iteration (multiple of 32)
    pub tile_k: usize,
    /// Number of independent K partitions combined atomically (1 = no split)
    pub split_k: usize,
    /// Architecture this configuration was tuned for
    pub arch: GpuArch,
    /// Activation dtype this configuration was compiled for
    pub dtype: DType,
}

impl KernelConfig {
    /// Untuned configuration that is valid for every supported shape.
    ///
    /// Correct but not fast; only used when a caller explicitly opts in.
    pub fn generic(dtype: DType, arch: GpuArch) -> Self {
        Self {
            tile_m: 16,
            tile_n: 64,
            tile_k: 32,
            split_k: 1,
            arch,
            dtype,
        }
    }

    /// Check structural validity.
    pub fn validate(&self) -> Result<()> {
        if self.tile_m == 0 || self.tile_n == 0 {
            return Err(Error::ConfigError {
                reason: format!(
                    "tile_m and tile_n must be positive, got {}x{}",
                    self.tile_m, self.tile_n
                ),
            });
        }
        if self.tile_k == 0 || self.tile_k % 32 != 0 {
            return Err(Error::ConfigError {
                reason: format!("tile_k must be a positive multiple of 32, got {}", self.tile_k),
            });
        }
        if self.split_k == 0 {
            return Err(Error::ConfigError {
                reason: "split_k must be at least 1".into(),
            });
        }
        if !self.dtype.is_activation() {
            return Err(Error::ConfigError {
                reason: format!("kernels are compiled for f16/bf16, not {}", self.dtype),
            });
        }
        Ok(())
    }

    /// Same tiles with split-K disabled
    pub fn without_split_k(self) -> Self {
        Self { split_k: 1, ..self }
    }

    /// Whether partial sums are combined atomically
    pub fn is_split(&self) -> bool {
        self.split_k > 1
    }
}

/// Per-dtype performance annotation
///
/// Both dtypes are equally correct; on some accelerators one of them has the
/// better-tuned code path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerfTier {
    /// Best-tuned path for this architecture
    #[default]
    Primary,
    /// Correct but measurably slower path
    Secondary,
}

/// Known limitation attached to a dispatch; not an error
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Advisory {
    /// Output closeness to the reference fails for a small fraction of inputs
    NumericalInstability {
        /// Affected invocation
        key: ConfigKey,
        /// Empirical fraction of failing cases
        failure_rate: f64,
    },
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NumericalInstability { key, failure_rate } => write!(
                f,
                "numerical instability for {key}: ~{:.2}% of cases exceed tolerance; validate outputs",
                failure_rate * 100.0
            ),
        }
    }
}

/// Configuration plus annotation stored per key
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegistryEntry {
    /// Tuned launch configuration
    pub config: KernelConfig,
    /// Performance annotation for this dtype/arch
    pub perf: PerfTier,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    version: u32,
    entries: Vec<EntryRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryRecord {
    dtype: DType,
    bits: BitWidth,
    group_size: GroupSize,
    m: usize,
    n: usize,
    k: usize,
    arch: GpuArch,
    #[serde(default = "default_tp")]
    tp: usize,
    tile_m: usize,
    tile_n: usize,
    tile_k: usize,
    split_k: usize,
    #[serde(default)]
    perf: PerfTier,
}

fn default_tp() -> usize {
    1
}

impl EntryRecord {
    fn split(self) -> (ConfigKey, RegistryEntry) {
        let key = ConfigKey {
            dtype: self.dtype,
            bits: self.bits,
            group_size: self.group_size,
            m: self.m,
            n: self.n,
            k: self.k,
            arch: self.arch,
            tp: self.tp,
        };
        let config = KernelConfig {
            tile_m: self.tile_m,
            tile_n: self.tile_n,
            tile_k: self.tile_k,
            split_k: self.split_k,
            arch: self.arch,
            dtype: self.dtype,
        };
        (
            key,
            RegistryEntry {
                config,
                perf: self.perf,
            },
        )
    }
}

/// Exact-match map from invocation tuple to tuned configuration
#[derive(Debug, Clone, Default)]
pub struct KernelRegistry {
    entries: HashMap<ConfigKey, RegistryEntry>,
}

impl KernelRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the tables shipped with the crate
    pub fn builtin() -> Result<Self> {
        Self::from_json_str(BUILTIN_TABLE)
    }

    /// Parse a registry table.
    ///
    /// # Errors
    ///
    /// `ConfigError` on malformed JSON, an unknown schema version, an invalid
    /// configuration or a key listed twice.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: RegistryFile = serde_json::from_str(json).map_err(|e| Error::ConfigError {
            reason: format!("registry parse error: {e}"),
        })?;
        if file.version != REGISTRY_VERSION {
            return Err(Error::ConfigError {
                reason: format!(
                    "registry version {} unsupported, expected {REGISTRY_VERSION}",
                    file.version
                ),
            });
        }

        let mut registry = Self::new();
        for record in file.entries {
            let (key, entry) = record.split();
            if registry.entries.contains_key(&key) {
                return Err(Error::ConfigError {
                    reason: format!("duplicate registry entry for {key}"),
                });
            }
            registry.register(key, entry.config, entry.perf)?;
        }
        debug!("loaded kernel registry with {} entries", registry.len());
        Ok(registry)
    }

    /// Read and parse a registry table from disk.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text).map_err(|e| match e {
            Error::ConfigError { reason } => Error::ConfigError {
                reason: format!("{}: {reason}", path.as_ref().display()),
            },
            other => other,
        })
    }

    /// Add or replace one entry.
    ///
    /// # Errors
    ///
    /// `ConfigError` if the configuration is invalid or disagrees with the key
    /// on dtype or architecture.
    pub fn register(&mut self, key: ConfigKey, config: KernelConfig, perf: PerfTier) -> Result<()> {
        config.validate()?;
        if config.dtype != key.dtype || config.arch != key.arch {
            return Err(Error::ConfigError {
                reason: format!(
                    "config for {}/{} registered under key {key}",
                    config.dtype, config.arch
                ),
            });
        }
        if key.tp == 0 {
            return Err(Error::ConfigError {
                reason: format!("tensor-parallel degree must be positive in {key}"),
            });
        }
        self.entries.insert(key, RegistryEntry { config, perf });
        Ok(())
    }

    /// Merge another registry in; its entries win on conflicts.
    pub fn merge(&mut self, other: KernelRegistry) {
        for (key, entry) in other.entries {
            if self.entries.insert(key, entry).is_some() {
                debug!("registry entry for {key} overridden");
            }
        }
    }

    /// Exact-match lookup.
    ///
    /// # Errors
    ///
    /// `UnsupportedShape` if no entry exists for `key`.
    pub fn lookup(&self, key: &ConfigKey) -> Result<&RegistryEntry> {
        match self.entries.get(key) {
            Some(entry) => {
                debug!("registry hit {key}: {:?}", entry.config);
                Ok(entry)
            }
            None => Err(Error::UnsupportedShape {
                key: key.to_string(),
            }),
        }
    }

    /// Exact-match lookup without an error
    pub fn get(&self, key: &ConfigKey) -> Option<&RegistryEntry> {
        self.entries.get(key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All registered keys
    pub fn keys(&self) -> impl Iterator<Item = &ConfigKey> {
        self.entries.keys()
    }

    /// Documented limitation for `key`, if any.
    ///
    /// (4-bit, group 256) on sm_80 has a measured failure rate against the
    /// reference of about 0.09%. Callers in that regime should validate output
    /// quality themselves.
    pub fn known_instability(key: &ConfigKey) -> Option<Advisory> {
        (key.bits == BitWidth::B4 && key.group_size == GroupSize::G256 && key.arch == GpuArch::Sm80)
            .then_some(Advisory::NumericalInstability {
                key: *key,
                failure_rate: SM80_G256_FAILURE_RATE,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(dtype: DType, m: usize, n: usize, k: usize, arch: GpuArch) -> ConfigKey {
        ConfigKey {
            dtype,
            bits: BitWidth::B4,
            group_size: GroupSize::G64,
            m,
            n,
            k,
            arch,
            tp: 1,
        }
    }

    #[test]
    fn test_builtin_parses() {
        let reg = KernelRegistry::builtin().unwrap();
        assert!(!reg.is_empty());
        for k in reg.keys() {
            let e = reg.get(k).unwrap();
            assert_eq!(e.config.dtype, k.dtype);
            assert_eq!(e.config.arch, k.arch);
            assert!(e.config.validate().is_ok());
        }
    }

    #[test]
    fn test_builtin_has_llama_shape() {
        let reg = KernelRegistry::builtin().unwrap();
        let k = key(DType::F16, 1, 4096, 4096, GpuArch::Sm80);
        assert!(reg.lookup(&k).is_ok());
    }

    #[test]
    fn test_exact_match_only() {
        let reg = KernelRegistry::builtin().unwrap();
        // one off in every dimension
        for k in [
            key(DType::F16, 1, 4096, 4097, GpuArch::Sm80),
            key(DType::F16, 3, 4096, 4096, GpuArch::Sm80),
            key(DType::F16, 1, 4095, 4096, GpuArch::Sm80),
        ] {
            assert!(matches!(reg.lookup(&k), Err(Error::UnsupportedShape { .. })));
        }
    }

    #[test]
    fn test_tp_is_part_of_key() {
        let mut reg = KernelRegistry::new();
        let k1 = key(DType::BF16, 1, 1024, 4096, GpuArch::Sm90);
        let k2 = ConfigKey { tp: 2, ..k1 };
        reg.register(k1, KernelConfig::generic(DType::BF16, GpuArch::Sm90), PerfTier::Primary)
            .unwrap();
        assert!(reg.lookup(&k1).is_ok());
        assert!(reg.lookup(&k2).is_err());
    }

    #[test]
    fn test_register_rejects_mismatch() {
        let mut reg = KernelRegistry::new();
        let k = key(DType::F16, 1, 64, 64, GpuArch::Sm80);
        let wrong_dtype = KernelConfig::generic(DType::BF16, GpuArch::Sm80);
        assert!(reg.register(k, wrong_dtype, PerfTier::Primary).is_err());
        let bad_tile = KernelConfig {
            tile_k: 48,
            ..KernelConfig::generic(DType::F16, GpuArch::Sm80)
        };
        assert!(reg.register(k, bad_tile, PerfTier::Primary).is_err());
    }

    #[test]
    fn test_from_json_rejects_duplicates_and_versions() {
        let entry = r#"{"dtype":"f16","bits":4,"group_size":64,"m":1,"n":64,"k":64,
            "arch":"host","tile_m":1,"tile_n":32,"tile_k":32,"split_k":1}"#;
        let dup = format!(r#"{{"version":1,"entries":[{entry},{entry}]}}"#);
        assert!(matches!(
            KernelRegistry::from_json_str(&dup),
            Err(Error::ConfigError { .. })
        ));
        let v2 = format!(r#"{{"version":2,"entries":[{entry}]}}"#);
        assert!(KernelRegistry::from_json_str(&v2).is_err());
        let ok = format!(r#"{{"version":1,"entries":[{entry}]}}"#);
        let reg = KernelRegistry::from_json_str(&ok).unwrap();
        let k = key(DType::F16, 1, 64, 64, GpuArch::Host);
        // tp and perf defaulted
        assert_eq!(reg.lookup(&k).unwrap().perf, PerfTier::Primary);
    }

    #[test]
    fn test_from_json_rejects_unsupported_bits() {
        let bad = r#"{"version":1,"entries":[{"dtype":"f16","bits":5,"group_size":64,
            "m":1,"n":64,"k":64,"arch":"host","tile_m":1,"tile_n":32,"tile_k":32,"split_k":1}]}"#;
        assert!(KernelRegistry::from_json_str(bad).is_err());
    }

    #[test]
    fn test_merge_overrides() {
        let mut a = KernelRegistry::new();
        let mut b = KernelRegistry::new();
        let k = key(DType::F16, 1, 64, 64, GpuArch::Host);
        a.register(k, KernelConfig::generic(DType::F16, GpuArch::Host), PerfTier::Primary)
            .unwrap();
        let tuned = KernelConfig {
            tile_n: 128,
            ..KernelConfig::generic(DType::F16, GpuArch::Host)
        };
        b.register(k, tuned, PerfTier::Secondary).unwrap();
        a.merge(b);
        assert_eq!(a.len(), 1);
        assert_eq!(a.lookup(&k).unwrap().config.tile_n, 128);
        assert_eq!(a.lookup(&k).unwrap().perf, PerfTier::Secondary);
    }

    #[test]
    fn test_known_instability() {
        let k = ConfigKey {
            group_size: GroupSize::G256,
            ..key(DType::F16, 1, 4096, 4096, GpuArch::Sm80)
        };
        match KernelRegistry::known_instability(&k) {
            Some(Advisory::NumericalInstability { failure_rate, .. }) => {
                assert_eq!(failure_rate, SM80_G256_FAILURE_RATE)
            }
            None => panic!("expected advisory"),
        }
        assert!(KernelRegistry::known_instability(&ConfigKey { arch: GpuArch::Sm90, ..k }).is_none());
        assert!(
            KernelRegistry::known_instability(&ConfigKey {
                bits: BitWidth::B3,
                ..k
            })
            .is_none()
        );
    }

    #[test]
    fn test_arch_from_compute_capability() {
        assert_eq!(GpuArch::from_compute_capability(8, 0), Some(GpuArch::Sm80));
        assert_eq!(GpuArch::from_compute_capability(9, 0), Some(GpuArch::Sm90));
        assert_eq!(GpuArch::from_compute_capability(7, 5), None);
    }

    #[test]
    fn test_key_display() {
        let k = key(DType::BF16, 16, 14336, 4096, GpuArch::Sm86);
        assert_eq!(k.to_string(), "bf16/4-bit/g64 m=16 n=14336 k=4096 sm_86 tp=1");
    }
}
