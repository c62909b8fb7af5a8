//! Register files an engine executes against.
use crate::errors::RuntimeResult;

pub mod daemon;
pub mod sim;

pub use daemon::DaemonSubstrate;
pub use sim::{SimSubstrate, StreamPort};

/// A file of 64-bit registers addressed through a
/// [VarLayout](crate::var_table::VarLayout). Reads may have side effects:
/// reading the wait register is what lets a substrate make progress.
pub trait Substrate: Send {
    fn read(&mut self, addr: u64) -> RuntimeResult<u64>;
    fn write(&mut self, addr: u64, value: u64) -> RuntimeResult<()>;
}
