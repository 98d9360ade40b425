//! Target chip descriptors and database
//!
//! Descriptors carry the memory geometry the engines need for page padding
//! and for configuring the probe's device context.

mod database;
mod types;

pub use database::*;
pub use types::*;
