//! Passes for the sluice compiler.
mod index_tasks;
mod machinify;

pub use index_tasks::{IoMode, TaskIndexer, TaskTable};
pub use machinify::{Machine, Machinify};
