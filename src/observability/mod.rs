//! Log output for the operator CLI.
//!
//! The library only emits `tracing` events; installing a subscriber is left to
//! the binary embedding it.

mod tracing_init;

pub use tracing_init::*;
