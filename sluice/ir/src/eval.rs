//! Evaluation of expressions on a 64-bit datapath.
use crate::base::{BlockIdx, ExprIdx, VarIdx};
use crate::expr::{BinOp, Expr, Signal, UnOp};
use crate::module::Module;
use sluice_utils::mask;
use std::collections::HashMap;
use std::convert::Infallible;

/// Where an expression reads its operands from.
pub trait Env {
    type Error;

    /// Low word of a variable.
    fn var(&mut self, var: VarIdx) -> Result<u64, Self::Error>;
    fn word(&mut self, var: VarIdx, word: u32) -> Result<u64, Self::Error>;
    fn signal(
        &mut self,
        signal: Signal,
        block: BlockIdx,
    ) -> Result<u64, Self::Error>;
    fn feof(&mut self, fd: u64) -> Result<bool, Self::Error>;
}

/// Evaluates `expr`. The result is masked to the expression's width.
pub fn eval<E: Env>(
    module: &Module,
    expr: ExprIdx,
    env: &mut E,
) -> Result<u64, E::Error> {
    Ok(eval_sized(module, expr, env)?.0)
}

/// Evaluates an expression whose environment cannot fail.
pub fn eval_infallible<E: Env<Error = Infallible>>(
    module: &Module,
    expr: ExprIdx,
    env: &mut E,
) -> u64 {
    match eval(module, expr, env) {
        Ok(v) => v,
        Err(never) => match never {},
    }
}

fn eval_sized<E: Env>(
    module: &Module,
    expr: ExprIdx,
    env: &mut E,
) -> Result<(u64, u32), E::Error> {
    let (value, width) = match &module.exprs[expr] {
        Expr::Const { value, width } => (*value, *width),
        Expr::Var(var) => (env.var(*var)?, module.vars[*var].width),
        Expr::Word { var, word } => (env.word(*var, *word)?, 64),
        Expr::Signal { signal, block } => {
            (env.signal(*signal, *block)?, signal.width())
        }
        Expr::Unary { op, arg } => {
            let (v, w) = eval_sized(module, *arg, env)?;
            match op {
                UnOp::Not => ((v == 0) as u64, 1),
                UnOp::BitNot => (!v, w),
                UnOp::Neg => (v.wrapping_neg(), w),
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            let (l, lw) = eval_sized(module, *lhs, env)?;
            let (r, rw) = eval_sized(module, *rhs, env)?;
            let w = lw.max(rw);
            match op {
                BinOp::Add => (l.wrapping_add(r), w),
                BinOp::Sub => (l.wrapping_sub(r), w),
                BinOp::Mul => (l.wrapping_mul(r), w),
                BinOp::BitAnd => (l & r, w),
                BinOp::BitOr => (l | r, w),
                BinOp::BitXor => (l ^ r, w),
                BinOp::Shl => (if r >= 64 { 0 } else { l << r }, lw),
                BinOp::Shr => (if r >= 64 { 0 } else { l >> r }, lw),
                BinOp::Eq => ((l == r) as u64, 1),
                BinOp::Ne => ((l != r) as u64, 1),
                BinOp::Lt => ((l < r) as u64, 1),
                BinOp::Le => ((l <= r) as u64, 1),
                BinOp::Gt => ((l > r) as u64, 1),
                BinOp::Ge => ((l >= r) as u64, 1),
                BinOp::And => ((l != 0 && r != 0) as u64, 1),
                BinOp::Or => ((l != 0 || r != 0) as u64, 1),
            }
        }
        Expr::Cond { cond, then, els } => {
            let (c, _) = eval_sized(module, *cond, env)?;
            let w = module.width_of(*then).max(module.width_of(*els));
            let chosen = if c != 0 { *then } else { *els };
            (eval_sized(module, chosen, env)?.0, w)
        }
        Expr::Slice { arg, msb, lsb } => {
            let (v, _) = eval_sized(module, *arg, env)?;
            let shifted = if *lsb >= 64 { 0 } else { v >> lsb };
            (shifted, msb - lsb + 1)
        }
        Expr::Feof(fd) => {
            let (fd, _) = eval_sized(module, *fd, env)?;
            (env.feof(fd)? as u64, 1)
        }
    };
    Ok((value & mask(width), width))
}

/// An environment backed by a snapshot of variable values. Signals read as
/// zero and every stream reports end-of-file as clear.
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub values: HashMap<VarIdx, Vec<u64>>,
}

impl Snapshot {
    pub fn insert(&mut self, var: VarIdx, words: Vec<u64>) {
        self.values.insert(var, words);
    }
}

impl Env for Snapshot {
    type Error = Infallible;

    fn var(&mut self, var: VarIdx) -> Result<u64, Infallible> {
        self.word(var, 0)
    }

    fn word(&mut self, var: VarIdx, word: u32) -> Result<u64, Infallible> {
        Ok(self
            .values
            .get(&var)
            .and_then(|w| w.get(word as usize))
            .copied()
            .unwrap_or(0))
    }

    fn signal(&mut self, _: Signal, _: BlockIdx) -> Result<u64, Infallible> {
        Ok(0)
    }

    fn feof(&mut self, _: u64) -> Result<bool, Infallible> {
        Ok(false)
    }
}
