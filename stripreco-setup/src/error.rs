//! Setup loading error types.

use thiserror::Error;

/// Result type for setup loading.
pub type Result<T> = std::result::Result<T, Error>;

/// Setup loading error types.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Malformed JSON or a field of the wrong type.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A module entry names neither an address nor a full position.
    #[error("module entry {index} has no address")]
    MissingAddress {
        /// Position of the entry in the module list.
        index: usize,
    },

    /// Core library error (geometry, calibration, parameters).
    #[error("core error: {0}")]
    CoreError(#[from] stripreco_core::Error),
}
