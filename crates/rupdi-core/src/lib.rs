//! rupdi-core - Core library for UPDI programming and debugging
//!
//! This crate holds what the probe engines share: the [`Target`] capability
//! trait, the error type, the tinyAVR memory map, the chip descriptor
//! database, session state flags and cooperative cancellation.
//!
//! # Example
//!
//! ```ignore
//! use rupdi_core::Target;
//!
//! fn identify<T: Target + ?Sized>(target: &mut T) -> rupdi_core::Result<()> {
//!     let sig = target.device_signature()?;
//!     println!("Signature: {:02X} {:02X} {:02X}", sig[0], sig[1], sig[2]);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cancel;
pub mod chip;
pub mod error;
pub mod memory;
pub mod probe;
pub mod session;
pub mod target;

pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use memory::{EraseMode, MemType};
pub use session::SessionState;
pub use target::{MessageListener, NoProgress, Progress, Target};
