//! Error types for the EDBG transport layer

use thiserror::Error;

/// Errors raised while locating, opening or talking to an EDBG probe
#[derive(Debug, Error)]
pub enum EdbgError {
    /// No matching probe is connected
    #[error("no EDBG probe found")]
    DeviceNotFound,

    /// Failed to open the USB device
    #[error("failed to open probe: {0}")]
    OpenFailed(String),

    /// Failed to claim the HID interface
    #[error("failed to claim HID interface: {0}")]
    ClaimFailed(String),

    /// A HID report transfer failed
    #[error("HID transfer failed: {0}")]
    TransferFailed(String),

    /// No report arrived within the configured timeout
    #[error("timed out waiting for HID report")]
    Timeout,

    /// Invalid option value
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Target supply is below the configured minimum
    #[error("target voltage {measured_mv} mV is below {min_mv} mV")]
    LowVoltage {
        /// Voltage reported by the probe
        measured_mv: u16,
        /// Configured minimum
        min_mv: u16,
    },

    /// Engine-level failure during open
    #[error(transparent)]
    Core(#[from] rupdi_core::Error),
}

/// Result type for EDBG transport operations
pub type Result<T> = std::result::Result<T, EdbgError>;

impl From<nusb::Error> for EdbgError {
    fn from(e: nusb::Error) -> Self {
        EdbgError::TransferFailed(e.to_string())
    }
}

impl From<nusb::transfer::TransferError> for EdbgError {
    fn from(e: nusb::transfer::TransferError) -> Self {
        EdbgError::TransferFailed(e.to_string())
    }
}

impl From<EdbgError> for rupdi_core::Error {
    fn from(e: EdbgError) -> Self {
        match e {
            EdbgError::Core(inner) => inner,
            EdbgError::InvalidParameter(msg) => rupdi_core::Error::InvalidArgument(msg),
            other => rupdi_core::Error::Transport(other.to_string()),
        }
    }
}
