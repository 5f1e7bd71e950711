//! Error types for stripreco-core.

use thiserror::Error;

/// Result type alias for stripreco operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for stripreco operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Module geometry is inconsistent or unusable.
    #[error("invalid geometry for module {address:#010x}: {reason}")]
    InvalidGeometry { address: u32, reason: String },

    /// Module calibration does not match its geometry.
    #[error("invalid calibration for module {address:#010x}: {reason}")]
    InvalidCalibration { address: u32, reason: String },

    /// Two modules registered under the same address.
    #[error("duplicate module address: {0:#010x}")]
    DuplicateModule(u32),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A pipeline stage was run out of order.
    #[error("pipeline stage {requested} cannot run from state {current}")]
    StageOrder {
        requested: &'static str,
        current: &'static str,
    },

    /// Event range does not fit into the digi batch.
    #[error("event range {start}..{end} exceeds batch of {len} digis")]
    InvalidEventRange { start: usize, end: usize, len: usize },
}
