//! Errors in the library.
use thiserror::Error;

/// Errors in the library.
///
/// Failures of environments and of the optimize calls of the models are not
/// wrapped; they travel unmodified through [`anyhow::Result`].
#[derive(Error, Debug)]
pub enum TwmError {
    /// Invalid configuration, raised when a trainer or a buffer is built.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A read or a sampling request exceeds the data currently in the buffer.
    #[error("Insufficient data: {0}")]
    DataAvailability(String),

    /// Arrays handed to an operation do not have the expected shapes.
    #[error("Shape mismatch: {0}")]
    Shape(String),

    /// Record key error.
    #[error("Record key error: {0}")]
    RecordKeyError(String),

    /// Record value type error.
    #[error("Record value type error: {0}")]
    RecordValueTypeError(String),
}
