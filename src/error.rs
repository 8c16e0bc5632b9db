//! lutr error types

use crate::dtype::DType;

/// lutr result type
pub type Result<T> = std::result::Result<T, Error>;

/// lutr errors
///
/// Every structural contract violation (bit width, group size, shape, dtype)
/// is reported here and never clamped or silently corrected. Numerical
/// instability is not an error; see [`crate::quant::registry::Advisory`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Packing requested a code width outside {2, 3, 4}
    #[error("unsupported bit width {bits}: expected one of 2, 3, 4")]
    UnsupportedBitWidth {
        /// The requested width
        bits: u32,
    },

    /// Group size outside {32, 64, 128, 256}, or not tiling the reduction dimension
    #[error("unsupported group size {group_size}: {reason}")]
    UnsupportedGroupSize {
        /// The requested group size
        group_size: usize,
        /// Why it was rejected
        reason: String,
    },

    /// No tuned kernel configuration exists and no generic fallback was requested
    #[error("no tuned kernel configuration for {key}")]
    UnsupportedShape {
        /// Rendered registry key that missed
        key: String,
    },

    /// Activation / kernel / output dtype disagreement
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch {
        /// Expected dtype
        expected: DType,
        /// Actual dtype
        got: DType,
    },

    /// Invalid argument to an operation
    #[error("invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// Argument name
        arg: &'static str,
        /// Why it's invalid
        reason: String,
    },

    /// Malformed persisted artifact
    #[error("format error: {reason}")]
    FormatError {
        /// Description of what went wrong
        reason: String,
    },

    /// Malformed registry table or runtime configuration
    #[error("config error: {reason}")]
    ConfigError {
        /// Description of what went wrong
        reason: String,
    },

    /// Fatal device fault reported by a GPU backend
    #[error("device error: {reason}")]
    DeviceError {
        /// Description of what went wrong
        reason: String,
    },

    /// I/O failure while reading or writing artifacts
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
