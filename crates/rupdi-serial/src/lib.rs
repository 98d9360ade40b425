//! rupdi-serial - UPDI over a plain serial adapter
//!
//! A USB-serial adapter with TX and RX joined through a resistor drives the
//! UPDI pin directly. The host speaks the UPDI instruction set itself, so
//! this engine covers programming only: signature, serial number, flash,
//! EEPROM, fuses, user row and chip erase. Live debugging needs an
//! EDBG-class probe.
//!
//! # Example
//!
//! ```no_run
//! use rupdi_core::chip::ChipDatabase;
//! use rupdi_core::Target;
//! use rupdi_serial::{parse_options, SerialEngine};
//!
//! let db = ChipDatabase::builtin()?;
//! let chip = db.find("ATtiny817").ok_or("unknown chip")?.clone();
//! let config = parse_options(&[("dev", "/dev/ttyUSB0"), ("baud", "115200")])?;
//! let mut engine = SerialEngine::open_port(chip, config)?;
//! let sig = engine.device_signature()?;
//! println!("Signature: {:02X} {:02X} {:02X}", sig[0], sig[1], sig[2]);
//! engine.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Configuration Options
//!
//! - `dev=PATH`: Serial device (required)
//! - `baud=N`: Line rate (default 57600)
//! - `timeout=N`: Response timeout in ms (default 100)
//! - `echotimeout=N`: Echo timeout in ms (default 500)
//! - `retries=N`: Link recovery attempts (default 5)
//! - `nvmpolls=N`: NVM busy polls (default 10)
//! - `regpolls=N`: Control/status register polls (default 100)
//! - `erasepolls=N`: Lock-bit polls after chip erase (default 100)

pub mod decode;
mod device;
mod error;
pub mod protocol;
#[cfg(test)]
mod sim;
pub mod transport;

pub use decode::decode_wire;
pub use device::{parse_options, SerialConfig, SerialEngine, MAX_BLOCK};
pub use error::{Result, SerialError};
pub use transport::serial::SerialPortLine;
pub use transport::SerialLine;
