//! Shared utilities for the sluice compiler crates.
mod errors;

pub mod math;

pub use errors::{Error, ErrorKind, SluiceResult};
pub use math::{bits_needed_for, mask, words_for};
