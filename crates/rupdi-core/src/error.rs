//! Error types shared by every rupdi engine
//!
//! Engines report state-guard failures, framing problems, device-reported
//! failures and exhausted polling loops through a single tagged union so
//! callers can match on the kind instead of parsing messages.

use thiserror::Error;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// An operation was invoked while its prerequisite state flag was not set
    #[error("{operation}: requires {requires}")]
    PreconditionViolated {
        /// Operation that was refused
        operation: &'static str,
        /// Missing state (e.g. "session", "program mode")
        requires: &'static str,
    },

    /// Malformed envelope, missing ACK or echo mismatch
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The probe answered with a FAILED response
    #[error("{}", device_failure(.context, .code))]
    DeviceFailure {
        /// Sub-protocol context of the failure
        context: u8,
        /// Failure code within that context
        code: u8,
    },

    /// A bounded polling loop ran out of iterations
    #[error("timeout: {0}")]
    Timeout(&'static str),

    /// The engine does not implement this capability
    #[error("not implemented: {0}")]
    Unsupported(&'static str),

    /// A wait was ended through its cancellation token
    #[error("operation cancelled")]
    Cancelled,

    /// Argument outside the range accepted by the operation
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Failure of the underlying USB or serial transport
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type for rupdi operations
pub type Result<T> = core::result::Result<T, Error>;

/// Sub-protocol handler IDs as they appear in the context byte of a FAILED reply
pub mod context {
    /// Probe discovery
    pub const DISCOVERY: u8 = 0x00;
    /// Probe housekeeping (session, tool info, analog readings)
    pub const HOUSEKEEPING: u8 = 0x01;
    /// AVR8 generic debug/programming
    pub const AVR8: u8 = 0x12;
    /// EDBG control (GPIO, voltage, configuration)
    pub const EDBG_CTRL: u8 = 0x20;
}

/// Render a (context, code) pair from a FAILED reply as a readable name
pub fn failure_message(context: u8, code: u8) -> String {
    match context {
        context::DISCOVERY => format!("DISCOVERY:code={}", code),
        context::HOUSEKEEPING => format!("HOUSEKEEPING:code={}", code),
        context::AVR8 => match avr8_failure(code) {
            Some(name) => format!("AVR8_FAILURE_{}", name),
            None => format!("AVR8_FAILURE:code=0x{:02X}", code),
        },
        context::EDBG_CTRL => match edbg_failure(code) {
            Some(name) => format!("EDBG_CTRL_FAILURE_{}", name),
            None => format!("EDBG_CTRL_FAILURE:code=0x{:02X}", code),
        },
        _ => format!("context=0x{:02X}:code=0x{:02X}", context, code),
    }
}

fn device_failure(context: &u8, code: &u8) -> String {
    failure_message(*context, *code)
}

fn avr8_failure(code: u8) -> Option<&'static str> {
    Some(match code {
        0x00 => "OK",
        0x10 => "DW_PHY_ERROR",
        0x11 => "JTAGM_INIT_ERROR",
        0x12 => "JTAGM_ERROR",
        0x13 => "JTAG_ERROR",
        0x14 => "JTAGM_VERSION",
        0x15 => "JTAGM_TIMEOUT",
        0x16 => "JTAG_BIT_BANGER_TIMEOUT",
        0x17 => "PARITY_ERROR",
        0x18 => "EB_ERROR",
        0x19 => "PDI_TIMEOUT",
        0x1A => "COLLISION",
        0x1B => "PDI_ENABLE",
        0x20 => "NO_DEVICE_FOUND",
        0x21 => "CLOCK_ERROR",
        0x22 => "NO_TARGET_POWER",
        0x23 => "NOT_ATTACHED",
        0x24 => "DAISY_CHAIN_TOO_LONG",
        0x25 => "DAISY_CHAIN_CONFIG",
        0x31 => "INVALID_PHYSICAL_STATE",
        0x32 => "ILLEGAL_STATE",
        0x33 => "INVALID_CONFIG",
        0x34 => "INVALID_MEMTYPE",
        0x35 => "INVALID_SIZE",
        0x36 => "INVALID_ADDRESS",
        0x37 => "INVALID_ALIGNMENT",
        0x38 => "ILLEGAL_MEMORY_RANGE",
        0x39 => "ILLEGAL_VALUE",
        0x3A => "ILLEGAL_ID",
        0x3B => "INVALID_CLOCK_SPEED",
        0x3C => "TIMEOUT",
        0x3D => "ILLEGAL_OCD_STATUS",
        0x40 => "NVM_ENABLE",
        0x41 => "NVM_DISABLE",
        0x42 => "CS_ERROR",
        0x43 => "CRC_FAILURE",
        0x44 => "OCD_LOCKED",
        0x50 => "NO_OCD_CONTROL",
        0x60 => "PC_READ_FAILED",
        0x61 => "REGISTER_READ_FAILED",
        0x70 => "READ_ERROR",
        0x71 => "WRITE_ERROR",
        0x72 => "WRITE_TIMEOUT",
        0x80 => "ILLEGAL_BREAKPOINT",
        0x81 => "TOO_MANY_BREAKPOINTS",
        0x90 => "NOT_SUPPORTED",
        0x91 => "NOT_IMPLEMENTED",
        0xFF => "UNKNOWN",
        _ => return None,
    })
}

fn edbg_failure(code: u8) -> Option<&'static str> {
    Some(match code {
        0x00 => "OK",
        0x01 => "NOT_SUPPORTED",
        0x10 => "ILLEGAL_GPIO_PIN",
        0x11 => "ILLEGAL_GPIO_MODE",
        0x12 => "ILLEGAL_VOLTAGE_RANGE",
        0x13 => "ILLEGAL_INTERVAL",
        0x14 => "ILLEGAL_MAX_THRESHOLD",
        0x15 => "ILLEGAL_MIN_THRESHOLD",
        0x16 => "ILLEGAL_ACTION",
        0x17 => "ILLEGAL_FREQUENCY",
        0x18 => "ILLEGAL_MODE",
        0x19 => "ILLEGAL_FLAGS",
        0x20 => "FLASH_WRITE",
        0x30 => "OVERFLOW",
        0xFF => "UNKNOWN",
        _ => return None,
    })
}
