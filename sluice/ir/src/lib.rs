//! Internal representation of hardware modules.
//!
//! A [`Module`] owns one arena per node kind. Statements, expressions and
//! blocks refer to each other by stable integer index, never by reference,
//! so a compiled unit (including the state machines generated from it) is
//! freed as one value.

mod base;
mod builder;
mod expr;
mod module;
mod printer;
mod stmt;

pub mod eval;
pub mod parser;
pub mod visitor;

pub use base::{BlockIdx, ExprIdx, StmtIdx, TaskIdx, UNRESOLVED_TASK, VarIdx};
pub use builder::Builder;
pub use expr::{BinOp, Expr, Signal, UnOp};
pub use module::{
    AlwaysBlock, ContinuousAssign, Event, EventKind, Init, Module, VarDecl,
    VarKind,
};
pub use printer::Printer;
pub use stmt::{CaseItem, Lvalue, Radix, Stmt, Task, Whence};
