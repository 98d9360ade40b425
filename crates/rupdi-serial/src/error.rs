//! Error types for the serial UPDI transport

use thiserror::Error;

/// Errors raised while opening or driving the serial line
#[derive(Debug, Error)]
pub enum SerialError {
    /// Failed to open the serial port
    #[error("failed to open serial port: {0}")]
    OpenFailed(String),

    /// I/O error on the line
    #[error("I/O error: {0}")]
    IoError(String),

    /// Invalid option value
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Error reported by the serialport crate
    #[error("serial port error: {0}")]
    Port(#[from] serialport::Error),

    /// Engine-level failure
    #[error(transparent)]
    Core(#[from] rupdi_core::Error),
}

/// Result type for serial transport operations
pub type Result<T> = std::result::Result<T, SerialError>;

impl From<std::io::Error> for SerialError {
    fn from(e: std::io::Error) -> Self {
        SerialError::IoError(e.to_string())
    }
}

impl From<SerialError> for rupdi_core::Error {
    fn from(e: SerialError) -> Self {
        match e {
            SerialError::Core(inner) => inner,
            SerialError::InvalidParameter(msg) => rupdi_core::Error::InvalidArgument(msg),
            other => rupdi_core::Error::Transport(other.to_string()),
        }
    }
}
