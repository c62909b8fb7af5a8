//! Analysis for the sluice passes.
//!
//! Analyses are read-only: they compute properties of a module that passes
//! and back ends consult.
mod assigned_vars;
mod task_check;

pub use assigned_vars::AssignedVars;
pub use task_check::TaskCheck;
