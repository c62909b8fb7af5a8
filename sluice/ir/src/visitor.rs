//! Read-only traversal of statement trees.
//!
//! A visitor overrides one or more of the hooks and relies on [walk_stmt]
//! to visit the children:
//! 1. `start_stmt`: called when visiting a statement top-down.
//! 2. `finish_stmt`: called when leaving a statement bottom-up.
//! 3. `visit_expr`: called for every expression node, parents first.
use crate::base::{ExprIdx, StmtIdx};
use crate::module::Module;

/// What the traversal does after a hook returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Continue,
    /// Do not visit the children of the current node.
    SkipChildren,
    /// Abort the whole traversal.
    Stop,
}

pub trait Visitor {
    fn start_stmt(&mut self, _module: &Module, _stmt: StmtIdx) -> Action {
        Action::Continue
    }

    fn finish_stmt(&mut self, _module: &Module, _stmt: StmtIdx) {}

    fn visit_expr(&mut self, _module: &Module, _expr: ExprIdx) -> Action {
        Action::Continue
    }
}

/// Visits `stmt`, the expressions it reads, and its children in program
/// order. Returns [Action::Stop] if the traversal was aborted.
pub fn walk_stmt<V: Visitor>(
    visitor: &mut V,
    module: &Module,
    stmt: StmtIdx,
) -> Action {
    match visitor.start_stmt(module, stmt) {
        Action::Stop => return Action::Stop,
        Action::SkipChildren => {
            visitor.finish_stmt(module, stmt);
            return Action::Continue;
        }
        Action::Continue => (),
    }
    let node = &module.stmts[stmt];
    for expr in node.exprs() {
        if walk_expr(visitor, module, expr) == Action::Stop {
            return Action::Stop;
        }
    }
    for child in node.children() {
        if walk_stmt(visitor, module, child) == Action::Stop {
            return Action::Stop;
        }
    }
    visitor.finish_stmt(module, stmt);
    Action::Continue
}

pub fn walk_expr<V: Visitor>(
    visitor: &mut V,
    module: &Module,
    expr: ExprIdx,
) -> Action {
    match visitor.visit_expr(module, expr) {
        Action::Stop => return Action::Stop,
        Action::SkipChildren => return Action::Continue,
        Action::Continue => (),
    }
    for child in module.exprs[expr].children() {
        if walk_expr(visitor, module, child) == Action::Stop {
            return Action::Stop;
        }
    }
    Action::Continue
}

/// Collects the variables an expression reads.
#[derive(Default)]
pub struct ReadVars {
    pub vars: Vec<crate::VarIdx>,
}

impl ReadVars {
    pub fn of(module: &Module, expr: ExprIdx) -> Vec<crate::VarIdx> {
        let mut collector = Self::default();
        walk_expr(&mut collector, module, expr);
        collector.vars
    }
}

impl Visitor for ReadVars {
    fn visit_expr(&mut self, module: &Module, expr: ExprIdx) -> Action {
        if let crate::Expr::Var(var) | crate::Expr::Word { var, .. } =
            &module.exprs[expr]
        {
            if !self.vars.contains(var) {
                self.vars.push(*var);
            }
        }
        Action::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BinOp, Builder, Stmt};

    struct Counter {
        stmts: usize,
        stop_at: Option<usize>,
    }

    impl Visitor for Counter {
        fn start_stmt(&mut self, module: &Module, stmt: StmtIdx) -> Action {
            self.stmts += 1;
            if Some(self.stmts) == self.stop_at {
                return Action::Stop;
            }
            if let Stmt::If { .. } = module.stmts[stmt] {
                return Action::SkipChildren;
            }
            Action::Continue
        }
    }

    #[test]
    fn skip_and_stop() {
        let mut m = Module::new("t");
        let mut b = Builder::new(&mut m);
        let x = b.reg("x", 4);
        let y = b.reg("y", 4);
        let xe = b.var(x);
        let ye = b.var(y);
        let a1 = b.assign(x, ye);
        let a2 = b.assign(y, xe);
        let cond = b.binary(BinOp::Eq, xe, ye);
        let branch = b.branch(cond, a1, Some(a2));
        let top = b.seq(vec![a1, branch, a2]);

        let mut all = Counter {
            stmts: 0,
            stop_at: None,
        };
        assert_eq!(walk_stmt(&mut all, &m, top), Action::Continue);
        // the if's branches are skipped
        assert_eq!(all.stmts, 4);

        let mut early = Counter {
            stmts: 0,
            stop_at: Some(2),
        };
        assert_eq!(walk_stmt(&mut early, &m, top), Action::Stop);
        assert_eq!(early.stmts, 2);

        assert_eq!(ReadVars::of(&m, cond), vec![x, y]);
    }
}
