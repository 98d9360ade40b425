//! CLI command implementations
//!
//! Every command that touches a part works on a `&mut dyn Target`, so the
//! same code drives EDBG probes, serial adapters and the dummy target.

pub mod debug;
pub mod decode;
pub mod erase;
pub mod fuses;
pub mod info;
mod list;
pub mod memory;
pub mod progress;

pub use list::{list_chips, list_programmers};
