//! rupdi-edbg - UPDI over EDBG-class USB HID probes
//!
//! This crate drives Microchip/Atmel debuggers that tunnel the AVR
//! communication protocol through 64-byte HID reports:
//! - nEDBG (Curiosity Nano boards)
//! - EDBG (Xplained Pro boards)
//! - mEDBG (Xplained Mini boards)
//! - Atmel-ICE, PICkit 4, MPLAB Snap
//!
//! # Protocol Overview
//!
//! Commands are wrapped in a frame carrying a 16-bit sequence number,
//! split into fragments of up to 60 bytes and sent as `AVR_CMD` reports.
//! The probe acknowledges each fragment; the response is then pulled with
//! `AVR_RSP` polls and may itself span several reports. Asynchronous target
//! events (breaks and debug output characters) are pulled with `AVR_EVT`
//! polls.
//!
//! # Example
//!
//! ```no_run
//! use rupdi_core::chip::ChipDatabase;
//! use rupdi_core::Target;
//! use rupdi_edbg::{parse_options, HidEngine};
//!
//! let db = ChipDatabase::builtin()?;
//! let chip = db.find("ATtiny817").ok_or("unknown chip")?.clone();
//! let config = parse_options(&[("clock", "225")])?;
//! let mut engine = HidEngine::open_usb(chip, config)?;
//! let sig = engine.device_signature()?;
//! println!("Signature: {:02X} {:02X} {:02X}", sig[0], sig[1], sig[2]);
//! engine.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Configuration Options
//!
//! - `index=N`: Select the Nth matching probe (0-indexed)
//! - `serial=XXXX`: Select a probe by USB serial number
//! - `clock=N`: UPDI clock in kHz (default 500)
//! - `mode=program|debug`: Enter programming mode or attach the debugger
//! - `vmin=N`: Minimum target voltage in mV (default 1000, 0 disables)
//! - `timeout=N`: HID report timeout in ms
//! - `budget=N`: Break-wait poll budget for attach, reset, stop and step
//! - `runbudget=N|none`: Break-wait poll budget for run and run-to

pub mod decode;
mod device;
mod error;
pub mod protocol;
#[cfg(test)]
mod sim;
pub mod transport;

pub use device::{parse_options, BreakWaitConfig, EdbgConfig, EdbgMode, HidEngine};
pub use error::{EdbgError, Result};
pub use protocol::{BreakEvent, ToolInfo};
pub use transport::usb::{list_probes, UsbHid, UsbProbe};
pub use transport::HidTransport;
