use crate::base::{BlockIdx, ExprIdx, StmtIdx, VarIdx};
use crate::expr::Signal;
use serde::{Deserialize, Serialize};

/// Target of an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lvalue {
    Var(VarIdx),
    Word { var: VarIdx, word: u32 },
    /// The reserved slot a task boundary writes its id into. Only exists
    /// between task indexing and lowering.
    TaskSlot,
    Signal { signal: Signal, block: BlockIdx },
    /// End-of-file flag of the stream named by the expression.
    Feof(ExprIdx),
}

impl From<VarIdx> for Lvalue {
    fn from(var: VarIdx) -> Self {
        Lvalue::Var(var)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stmt {
    Seq(Vec<StmtIdx>),
    /// Blocking assignment.
    Assign { lhs: Lvalue, rhs: ExprIdx },
    Nonblocking { lhs: Lvalue, rhs: ExprIdx },
    If {
        cond: ExprIdx,
        then: StmtIdx,
        els: Option<StmtIdx>,
    },
    Case {
        cond: ExprIdx,
        items: Vec<CaseItem>,
        default: Option<StmtIdx>,
    },
    Task(Task),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseItem {
    pub matches: Vec<ExprIdx>,
    pub body: StmtIdx,
}

impl Stmt {
    /// Direct child statements, in program order.
    pub fn children(&self) -> Vec<StmtIdx> {
        match self {
            Stmt::Seq(stmts) => stmts.clone(),
            Stmt::If { then, els, .. } => {
                std::iter::once(*then).chain(*els).collect()
            }
            Stmt::Case { items, default, .. } => items
                .iter()
                .map(|item| item.body)
                .chain(*default)
                .collect(),
            Stmt::Assign { .. } | Stmt::Nonblocking { .. } | Stmt::Task(_) => {
                vec![]
            }
        }
    }

    /// Expressions read by this statement itself, excluding those of child
    /// statements.
    pub fn exprs(&self) -> Vec<ExprIdx> {
        match self {
            Stmt::Seq(_) => vec![],
            Stmt::Assign { lhs, rhs } | Stmt::Nonblocking { lhs, rhs } => {
                match lhs {
                    Lvalue::Feof(fd) => vec![*fd, *rhs],
                    _ => vec![*rhs],
                }
            }
            Stmt::If { cond, .. } => vec![*cond],
            Stmt::Case { cond, items, .. } => std::iter::once(*cond)
                .chain(items.iter().flat_map(|i| i.matches.iter().copied()))
                .collect(),
            Stmt::Task(task) => task.exprs(),
        }
    }

    pub fn is_task(&self) -> bool {
        matches!(self, Stmt::Task(_))
    }
}

/// Radix used by formatted reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Radix {
    Bin,
    #[default]
    Dec,
    Hex,
}

impl Radix {
    pub fn base(&self) -> u32 {
        match self {
            Radix::Bin => 2,
            Radix::Dec => 10,
            Radix::Hex => 16,
        }
    }
}

/// Origin of a seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Whence {
    Begin,
    Current,
    End,
}

impl Whence {
    /// Decodes the `fseek` operation code (0 begin, 1 current, 2 end).
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Whence::Begin),
            1 => Some(Whence::Current),
            2 => Some(Whence::End),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Whence::Begin => 0,
            Whence::Current => 1,
            Whence::End => 2,
        }
    }
}

/// System tasks. These are the statements that need the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Task {
    Debug { action: u32, text: String },
    Finish { arg: ExprIdx },
    Fflush { fd: ExprIdx },
    Fseek {
        fd: ExprIdx,
        offset: ExprIdx,
        whence: Whence,
    },
    Get {
        fd: ExprIdx,
        var: Option<VarIdx>,
        radix: Radix,
    },
    Put {
        fd: ExprIdx,
        expr: ExprIdx,
        radix: Radix,
    },
    Restart { path: String },
    Retarget { target: String },
    Save { path: String },
    Yield,
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::Debug { .. } => "debug",
            Task::Finish { .. } => "finish",
            Task::Fflush { .. } => "fflush",
            Task::Fseek { .. } => "fseek",
            Task::Get { .. } => "get",
            Task::Put { .. } => "put",
            Task::Restart { .. } => "restart",
            Task::Retarget { .. } => "retarget",
            Task::Save { .. } => "save",
            Task::Yield => "yield",
        }
    }

    /// Tasks the engine cannot service on its own and must hand back to the
    /// caller.
    pub fn is_caller_visible(&self) -> bool {
        matches!(
            self,
            Task::Finish { .. }
                | Task::Restart { .. }
                | Task::Retarget { .. }
                | Task::Save { .. }
                | Task::Yield
        )
    }

    /// The stream descriptor expression, for tasks that address a stream.
    pub fn fd(&self) -> Option<ExprIdx> {
        match self {
            Task::Fflush { fd }
            | Task::Fseek { fd, .. }
            | Task::Get { fd, .. }
            | Task::Put { fd, .. } => Some(*fd),
            _ => None,
        }
    }

    pub fn exprs(&self) -> Vec<ExprIdx> {
        match self {
            Task::Finish { arg } => vec![*arg],
            Task::Fflush { fd } | Task::Get { fd, .. } => vec![*fd],
            Task::Fseek { fd, offset, .. } => vec![*fd, *offset],
            Task::Put { fd, expr, .. } => vec![*fd, *expr],
            Task::Debug { .. }
            | Task::Restart { .. }
            | Task::Retarget { .. }
            | Task::Save { .. }
            | Task::Yield => vec![],
        }
    }
}
