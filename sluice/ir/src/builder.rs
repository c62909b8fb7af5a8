//! IR Builder. Provides convenience methods to build the nodes of a module.
use crate::base::{BlockIdx, ExprIdx, StmtIdx, VarIdx};
use crate::expr::{BinOp, Expr, Signal, UnOp};
use crate::module::{
    AlwaysBlock, ContinuousAssign, Event, Init, Module, VarDecl, VarKind,
};
use crate::stmt::{CaseItem, Lvalue, Stmt, Task};

/// IR builder.
/// Appends nodes to the arenas of the module it borrows. Children have to be
/// built before their parents, which keeps the arenas topologically ordered.
pub struct Builder<'a> {
    /// Module for which this builder is constructing.
    pub module: &'a mut Module,
}

impl<'a> Builder<'a> {
    pub fn new(module: &'a mut Module) -> Self {
        Self { module }
    }

    pub fn declare(&mut self, decl: VarDecl) -> VarIdx {
        self.module.vars.push(decl)
    }

    fn add_var(&mut self, name: &str, width: u32, kind: VarKind) -> VarIdx {
        self.declare(VarDecl {
            name: name.to_string(),
            width,
            kind,
            volatile: false,
            init: None,
        })
    }

    pub fn input(&mut self, name: &str, width: u32) -> VarIdx {
        self.add_var(name, width, VarKind::Input)
    }

    pub fn output(&mut self, name: &str, width: u32) -> VarIdx {
        self.add_var(name, width, VarKind::Output)
    }

    pub fn reg(&mut self, name: &str, width: u32) -> VarIdx {
        self.add_var(name, width, VarKind::Reg)
    }

    /// A register excluded from state snapshots.
    pub fn volatile_reg(&mut self, name: &str, width: u32) -> VarIdx {
        let var = self.reg(name, width);
        self.module.vars[var].volatile = true;
        var
    }

    /// A register holding the descriptor of `path`, opened when the engine
    /// is finalized.
    pub fn fopen(&mut self, name: &str, path: &str) -> VarIdx {
        let var = self.reg(name, 32);
        self.module.vars[var].init = Some(Init::Fopen(path.to_string()));
        var
    }

    pub fn expr(&mut self, expr: Expr) -> ExprIdx {
        self.module.exprs.push(expr)
    }

    pub fn constant(&mut self, value: u64, width: u32) -> ExprIdx {
        self.expr(Expr::Const { value, width })
    }

    pub fn var(&mut self, var: VarIdx) -> ExprIdx {
        self.expr(Expr::Var(var))
    }

    pub fn word(&mut self, var: VarIdx, word: u32) -> ExprIdx {
        self.expr(Expr::Word { var, word })
    }

    pub fn signal(&mut self, signal: Signal, block: BlockIdx) -> ExprIdx {
        self.expr(Expr::Signal { signal, block })
    }

    pub fn unary(&mut self, op: UnOp, arg: ExprIdx) -> ExprIdx {
        self.expr(Expr::Unary { op, arg })
    }

    pub fn binary(&mut self, op: BinOp, lhs: ExprIdx, rhs: ExprIdx) -> ExprIdx {
        self.expr(Expr::Binary { op, lhs, rhs })
    }

    pub fn cond(
        &mut self,
        cond: ExprIdx,
        then: ExprIdx,
        els: ExprIdx,
    ) -> ExprIdx {
        self.expr(Expr::Cond { cond, then, els })
    }

    pub fn slice(&mut self, arg: ExprIdx, msb: u32, lsb: u32) -> ExprIdx {
        self.expr(Expr::Slice { arg, msb, lsb })
    }

    pub fn feof(&mut self, fd: ExprIdx) -> ExprIdx {
        self.expr(Expr::Feof(fd))
    }

    pub fn stmt(&mut self, stmt: Stmt) -> StmtIdx {
        self.module.stmts.push(stmt)
    }

    pub fn assign<L: Into<Lvalue>>(&mut self, lhs: L, rhs: ExprIdx) -> StmtIdx {
        self.stmt(Stmt::Assign {
            lhs: lhs.into(),
            rhs,
        })
    }

    pub fn nonblocking<L: Into<Lvalue>>(
        &mut self,
        lhs: L,
        rhs: ExprIdx,
    ) -> StmtIdx {
        self.stmt(Stmt::Nonblocking {
            lhs: lhs.into(),
            rhs,
        })
    }

    pub fn seq(&mut self, stmts: Vec<StmtIdx>) -> StmtIdx {
        self.stmt(Stmt::Seq(stmts))
    }

    pub fn branch(
        &mut self,
        cond: ExprIdx,
        then: StmtIdx,
        els: Option<StmtIdx>,
    ) -> StmtIdx {
        self.stmt(Stmt::If { cond, then, els })
    }

    pub fn case(
        &mut self,
        cond: ExprIdx,
        items: Vec<CaseItem>,
        default: Option<StmtIdx>,
    ) -> StmtIdx {
        self.stmt(Stmt::Case {
            cond,
            items,
            default,
        })
    }

    pub fn task(&mut self, task: Task) -> StmtIdx {
        self.stmt(Stmt::Task(task))
    }

    pub fn always(&mut self, events: Vec<Event>, body: StmtIdx) -> BlockIdx {
        self.module.blocks.push(AlwaysBlock { events, body })
    }

    pub fn continuous(&mut self, lhs: VarIdx, rhs: ExprIdx) {
        self.module.assigns.push(ContinuousAssign { lhs, rhs });
    }
}
