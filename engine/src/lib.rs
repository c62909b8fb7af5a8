//! Execution engines for lowered hardware modules.
//!
//! An [Engine](engine::Engine) is one compiled, running instance of a module.
//! The [LogicEngine](logic::LogicEngine) implements the capability set on top
//! of a [Substrate](substrate::Substrate) through the register-level control
//! protocol of the [VarTable](var_table::VarTable). Back ends are looked up
//! by name in the [Compiler](backend::Compiler) registry.
pub mod backend;
pub mod bits;
pub mod configuration;
pub mod engine;
pub mod errors;
pub mod interface;
pub mod io;
pub mod logging;
pub mod logic;
pub mod program;
pub mod substrate;
pub mod system;
pub mod var_table;

pub use engine::{Engine, Input, State, VId};
pub use errors::{BoxedRuntimeError, RuntimeError, RuntimeResult};
pub use interface::{Host, Interface, SharedHost};
