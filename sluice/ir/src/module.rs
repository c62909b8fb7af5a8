use crate::base::{BlockIdx, ExprIdx, StmtIdx, VarIdx};
use crate::expr::Expr;
use crate::stmt::{Lvalue, Stmt};
use serde::{Deserialize, Serialize};
use sluice_idx::{IndexRef, maps::IndexedMap};
use sluice_utils::{Error, SluiceResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarKind {
    Input,
    Output,
    Reg,
}

/// Initial value of a variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Init {
    Value(u64),
    /// A stream descriptor obtained by opening `path` through the caller.
    Fopen(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: String,
    pub width: u32,
    pub kind: VarKind,
    /// Volatile variables are not part of the persistent state.
    #[serde(default)]
    pub volatile: bool,
    #[serde(default)]
    pub init: Option<Init>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Posedge,
    Negedge,
    /// Any change of the operand.
    Edge,
}

impl EventKind {
    /// Does a change from `prev` to `cur` fire this event?
    pub fn fires(&self, prev: u64, cur: u64) -> bool {
        match self {
            EventKind::Posedge => prev & 1 == 0 && cur & 1 == 1,
            EventKind::Negedge => prev & 1 == 1 && cur & 1 == 0,
            EventKind::Edge => prev != cur,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub var: VarIdx,
}

impl Event {
    pub fn posedge(var: VarIdx) -> Self {
        Self {
            kind: EventKind::Posedge,
            var,
        }
    }

    pub fn negedge(var: VarIdx) -> Self {
        Self {
            kind: EventKind::Negedge,
            var,
        }
    }

    pub fn edge(var: VarIdx) -> Self {
        Self {
            kind: EventKind::Edge,
            var,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlwaysBlock {
    pub events: Vec<Event>,
    pub body: StmtIdx,
}

impl AlwaysBlock {
    /// Blocks sensitive to a clock edge are lowered into state machines.
    /// Blocks sensitive only to arbitrary changes are left as they are.
    pub fn is_clocked(&self) -> bool {
        self.events.iter().any(|e| e.kind != EventKind::Edge)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuousAssign {
    pub lhs: VarIdx,
    pub rhs: ExprIdx,
}

/// A module declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub vars: IndexedMap<VarIdx, VarDecl>,
    pub exprs: IndexedMap<ExprIdx, Expr>,
    pub stmts: IndexedMap<StmtIdx, Stmt>,
    pub blocks: IndexedMap<BlockIdx, AlwaysBlock>,
    #[serde(default)]
    pub assigns: Vec<ContinuousAssign>,
}

impl Module {
    pub fn new<S: ToString>(name: S) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn find_var(&self, name: &str) -> Option<VarIdx> {
        self.vars
            .iter()
            .find(|(_, decl)| decl.name == name)
            .map(|(idx, _)| idx)
    }

    pub fn inputs(&self) -> impl Iterator<Item = VarIdx> + '_ {
        self.vars_of(VarKind::Input)
    }

    pub fn outputs(&self) -> impl Iterator<Item = VarIdx> + '_ {
        self.vars_of(VarKind::Output)
    }

    /// Variables captured by a state snapshot: everything the module itself
    /// drives, minus volatile variables.
    pub fn state_vars(&self) -> impl Iterator<Item = VarIdx> + '_ {
        self.vars
            .iter()
            .filter(|(_, d)| d.kind != VarKind::Input && !d.volatile)
            .map(|(idx, _)| idx)
    }

    fn vars_of(&self, kind: VarKind) -> impl Iterator<Item = VarIdx> + '_ {
        self.vars
            .iter()
            .filter(move |(_, d)| d.kind == kind)
            .map(|(idx, _)| idx)
    }

    /// The clock an open-loop run may toggle: the module's only input, when
    /// it is a single bit and the module has no outputs.
    pub fn open_loop_clock(&self) -> Option<VarIdx> {
        let inputs: Vec<_> = self.inputs().collect();
        match inputs.as_slice() {
            [clk]
                if self.vars[*clk].width == 1
                    && self.outputs().next().is_none() =>
            {
                Some(*clk)
            }
            _ => None,
        }
    }

    /// Width in bits of the value an expression produces.
    pub fn width_of(&self, expr: ExprIdx) -> u32 {
        match &self.exprs[expr] {
            Expr::Const { width, .. } => *width,
            Expr::Var(var) => self.vars[*var].width,
            Expr::Word { .. } => 64,
            Expr::Signal { signal, .. } => signal.width(),
            Expr::Unary { op, arg } => match op {
                crate::UnOp::Not => 1,
                _ => self.width_of(*arg),
            },
            Expr::Binary { op, lhs, rhs } => {
                if op.is_boolean() {
                    1
                } else if matches!(op, crate::BinOp::Shl | crate::BinOp::Shr)
                {
                    self.width_of(*lhs)
                } else {
                    self.width_of(*lhs).max(self.width_of(*rhs))
                }
            }
            Expr::Cond { then, els, .. } => {
                self.width_of(*then).max(self.width_of(*els))
            }
            Expr::Slice { msb, lsb, .. } => msb - lsb + 1,
            Expr::Feof(_) => 1,
        }
    }

    /// Checks a module received from outside the process. Every index must be
    /// in range, children must precede their parents in the arenas (which
    /// rules out cycles), and reserved machine registers may not appear.
    pub fn validate(&self) -> SluiceResult<()> {
        for (idx, decl) in self.vars.iter() {
            if decl.width == 0 {
                return Err(Error::malformed_structure(format!(
                    "variable `{}' ({idx}) has zero width",
                    decl.name
                )));
            }
        }
        for (idx, expr) in self.exprs.iter() {
            for child in expr.children() {
                if child.index() >= idx.index() {
                    return Err(Error::malformed_structure(format!(
                        "expression {idx} refers to expression {child} which does not precede it"
                    )));
                }
            }
            match expr {
                Expr::Var(var) | Expr::Word { var, .. } => {
                    self.check_var(*var)?
                }
                Expr::Signal { signal, .. } => {
                    return Err(Error::malformed_structure(format!(
                        "expression {idx} reads reserved register `{}'",
                        signal.name()
                    )));
                }
                Expr::Slice { msb, lsb, .. } if msb < lsb => {
                    return Err(Error::malformed_structure(format!(
                        "expression {idx} slices [{msb}:{lsb}]"
                    )));
                }
                Expr::Const { width: 0, .. } => {
                    return Err(Error::malformed_structure(format!(
                        "constant {idx} has zero width"
                    )));
                }
                _ => (),
            }
        }
        for (idx, stmt) in self.stmts.iter() {
            for child in stmt.children() {
                if child.index() >= idx.index() {
                    return Err(Error::malformed_structure(format!(
                        "statement {idx} refers to statement {child} which does not precede it"
                    )));
                }
            }
            for expr in stmt.exprs() {
                self.check_expr(expr)?;
            }
            match stmt {
                Stmt::Assign { lhs, .. } | Stmt::Nonblocking { lhs, .. } => {
                    self.check_lvalue(idx, lhs)?
                }
                Stmt::Case { items, .. } => {
                    if items.iter().any(|i| i.matches.is_empty()) {
                        return Err(Error::malformed_structure(format!(
                            "case statement {idx} has an item without labels"
                        )));
                    }
                }
                Stmt::Task(crate::Task::Get { var: Some(var), .. }) => {
                    self.check_assignable(idx, *var)?
                }
                _ => (),
            }
        }
        for (idx, block) in self.blocks.iter() {
            if block.body.index() >= self.stmts.len() {
                return Err(Error::undefined(
                    block.body.to_string(),
                    "statement".to_string(),
                ));
            }
            if block.events.is_empty() {
                return Err(Error::malformed_structure(format!(
                    "always block {idx} has an empty sensitivity list"
                )));
            }
            for event in &block.events {
                self.check_var(event.var)?;
            }
        }
        for assign in &self.assigns {
            self.check_expr(assign.rhs)?;
            self.check_var(assign.lhs)?;
            if self.vars[assign.lhs].kind == VarKind::Input {
                return Err(Error::malformed_structure(format!(
                    "continuous assignment drives input `{}'",
                    self.vars[assign.lhs].name
                )));
            }
        }
        Ok(())
    }

    fn check_var(&self, var: VarIdx) -> SluiceResult<()> {
        if var.index() < self.vars.len() {
            Ok(())
        } else {
            Err(Error::undefined(var.to_string(), "variable".to_string()))
        }
    }

    fn check_expr(&self, expr: ExprIdx) -> SluiceResult<()> {
        if expr.index() < self.exprs.len() {
            Ok(())
        } else {
            Err(Error::undefined(expr.to_string(), "expression".to_string()))
        }
    }

    fn check_assignable(&self, stmt: StmtIdx, var: VarIdx) -> SluiceResult<()> {
        self.check_var(var)?;
        if self.vars[var].kind == VarKind::Input {
            return Err(Error::malformed_structure(format!(
                "statement {stmt} assigns input `{}'",
                self.vars[var].name
            )));
        }
        Ok(())
    }

    fn check_lvalue(&self, stmt: StmtIdx, lhs: &Lvalue) -> SluiceResult<()> {
        match lhs {
            Lvalue::Var(var) => self.check_assignable(stmt, *var),
            Lvalue::Word { var, word } => {
                self.check_assignable(stmt, *var)?;
                if *word >= sluice_utils::words_for(self.vars[*var].width) {
                    return Err(Error::malformed_structure(format!(
                        "statement {stmt} assigns word {word} of `{}'",
                        self.vars[*var].name
                    )));
                }
                Ok(())
            }
            Lvalue::Feof(fd) => self.check_expr(*fd),
            Lvalue::TaskSlot | Lvalue::Signal { .. } => {
                Err(Error::malformed_structure(format!(
                    "statement {stmt} assigns a reserved register"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BinOp, Builder, Radix, Task};

    fn counter() -> Module {
        let mut m = Module::new("counter");
        let mut b = Builder::new(&mut m);
        let clk = b.input("clk", 1);
        let count = b.reg("count", 8);
        let one = b.constant(1, 8);
        let read = b.var(count);
        let sum = b.binary(BinOp::Add, read, one);
        let fd = b.constant(1, 32);
        let put = b.task(Task::Put {
            fd,
            expr: read,
            radix: Radix::Dec,
        });
        let inc = b.nonblocking(count, sum);
        let body = b.seq(vec![put, inc]);
        b.always(vec![Event::posedge(clk)], body);
        m
    }

    #[test]
    fn counter_is_valid() {
        let m = counter();
        assert!(m.validate().is_ok());
        assert_eq!(m.open_loop_clock(), m.find_var("clk"));
        assert_eq!(m.state_vars().collect::<Vec<_>>(), vec![
            m.find_var("count").unwrap()
        ]);
    }

    #[test]
    fn outputs_disable_open_loop() {
        let mut m = counter();
        Builder::new(&mut m).output("led", 1);
        assert_eq!(m.open_loop_clock(), None);
    }

    #[test]
    fn forward_references_are_rejected() {
        let mut m = counter();
        let late = m.exprs.peek_next_idx();
        m.exprs.push(Expr::Unary {
            op: crate::UnOp::Not,
            arg: late,
        });
        assert!(m.validate().is_err());
    }

    #[test]
    fn assigning_an_input_is_rejected() {
        let mut m = Module::new("bad");
        let mut b = Builder::new(&mut m);
        let clk = b.input("clk", 1);
        let zero = b.constant(0, 1);
        let assign = b.assign(clk, zero);
        let body = b.seq(vec![assign]);
        b.always(vec![Event::posedge(clk)], body);
        assert!(m.validate().is_err());
    }

    #[test]
    fn width_inference() {
        let mut m = Module::new("w");
        let mut b = Builder::new(&mut m);
        let x = b.reg("x", 12);
        let xe = b.var(x);
        let y = b.constant(3, 4);
        let sum = b.binary(BinOp::Add, xe, y);
        let cmp = b.binary(BinOp::Lt, xe, y);
        let sl = b.slice(xe, 7, 4);
        assert_eq!(m.width_of(sum), 12);
        assert_eq!(m.width_of(cmp), 1);
        assert_eq!(m.width_of(sl), 4);
    }
}
