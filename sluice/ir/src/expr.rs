use crate::base::{BlockIdx, ExprIdx, VarIdx};
use serde::{Deserialize, Serialize};

/// Expressions evaluate on a 64-bit datapath. Wider variables are read one
/// word at a time through [`Expr::Word`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    Const { value: u64, width: u32 },
    Var(VarIdx),
    /// The `word`-th 64-bit word of a variable.
    Word { var: VarIdx, word: u32 },
    /// A machine register of a lowered block.
    Signal { signal: Signal, block: BlockIdx },
    Unary { op: UnOp, arg: ExprIdx },
    Binary {
        op: BinOp,
        lhs: ExprIdx,
        rhs: ExprIdx,
    },
    Cond {
        cond: ExprIdx,
        then: ExprIdx,
        els: ExprIdx,
    },
    /// Bits `msb` down to `lsb`, inclusive.
    Slice { arg: ExprIdx, msb: u32, lsb: u32 },
    /// End-of-file flag of the stream named by the operand.
    Feof(ExprIdx),
}

impl Expr {
    /// Direct subexpressions, in evaluation order.
    pub fn children(&self) -> Vec<ExprIdx> {
        match self {
            Expr::Const { .. }
            | Expr::Var(_)
            | Expr::Word { .. }
            | Expr::Signal { .. } => vec![],
            Expr::Unary { arg, .. } | Expr::Slice { arg, .. } => vec![*arg],
            Expr::Feof(fd) => vec![*fd],
            Expr::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            Expr::Cond { cond, then, els } => vec![*cond, *then, *els],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    /// Logical negation.
    Not,
    /// Bitwise negation.
    BitNot,
    Neg,
}

impl UnOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnOp::Not => "!",
            UnOp::BitNot => "~",
            UnOp::Neg => "-",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Logical conjunction.
    And,
    /// Logical disjunction.
    Or,
}

impl BinOp {
    /// Operators producing a single bit.
    pub fn is_boolean(&self) -> bool {
        matches!(
            self,
            BinOp::Eq
                | BinOp::Ne
                | BinOp::Lt
                | BinOp::Le
                | BinOp::Gt
                | BinOp::Ge
                | BinOp::And
                | BinOp::Or
        )
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

/// Registers synthesized for every lowered block.
///
/// `Trigger`, `Continue` and `Reset` are read-only: the substrate drives them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    /// Current state number.
    State,
    /// Set when the machine suspends at a task or handshake boundary.
    Paused,
    /// Raw id of the task the machine is suspended on.
    TaskId,
    /// Nonzero while a read handshake word is requested; holds the task id.
    FreadReq,
    /// Word delivered by the read handshake.
    FreadData,
    FwriteReq,
    FwriteData,
    /// High in the cycle the block's sensitivity list fires.
    Trigger,
    /// High in the cycle the host resumes this block.
    Continue,
    Reset,
}

impl Signal {
    pub fn width(&self) -> u32 {
        match self {
            Signal::State => 32,
            Signal::TaskId | Signal::FreadReq => 16,
            Signal::FreadData | Signal::FwriteData => 64,
            Signal::Paused
            | Signal::FwriteReq
            | Signal::Trigger
            | Signal::Continue
            | Signal::Reset => 1,
        }
    }

    pub fn is_writable(&self) -> bool {
        !matches!(self, Signal::Trigger | Signal::Continue | Signal::Reset)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Signal::State => "__state",
            Signal::Paused => "__paused",
            Signal::TaskId => "__task_id",
            Signal::FreadReq => "__fread_req",
            Signal::FreadData => "__fread_data",
            Signal::FwriteReq => "__fwrite_req",
            Signal::FwriteData => "__fwrite_data",
            Signal::Trigger => "__trigger",
            Signal::Continue => "__continue",
            Signal::Reset => "__reset",
        }
    }
}
