//! Passes that prepare a module for execution on a substrate that cannot
//! block: task indexing and state-machine lowering.
pub mod analysis;
pub mod passes;
pub mod traversal;

pub use passes::{IoMode, Machine, Machinify, TaskIndexer, TaskTable};
