use sluice_ir::visitor::{Action, Visitor, walk_stmt};
use sluice_ir::{Lvalue, Module, Stmt, StmtIdx};

/// Detects whether a statement tree contains a task: an unindexed task
/// statement or an assignment to the reserved task slot.
#[derive(Default)]
pub struct TaskCheck {
    found: bool,
}

impl TaskCheck {
    pub fn contains_task(module: &Module, stmt: StmtIdx) -> bool {
        let mut check = Self::default();
        walk_stmt(&mut check, module, stmt);
        check.found
    }
}

impl Visitor for TaskCheck {
    fn start_stmt(&mut self, module: &Module, stmt: StmtIdx) -> Action {
        match &module.stmts[stmt] {
            Stmt::Task(_)
            | Stmt::Assign {
                lhs: Lvalue::TaskSlot,
                ..
            } => {
                self.found = true;
                Action::Stop
            }
            _ => Action::Continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_ir::{BinOp, Builder, Task};

    #[test]
    fn finds_nested_tasks() {
        let mut m = Module::new("t");
        let mut b = Builder::new(&mut m);
        let x = b.reg("x", 1);
        let xe = b.var(x);
        let one = b.constant(1, 1);
        let cond = b.binary(BinOp::Eq, xe, one);
        let plain = b.assign(x, one);
        let quiet = b.branch(cond, plain, None);
        let y = b.task(Task::Yield);
        let inner = b.seq(vec![y]);
        let loud = b.branch(cond, plain, Some(inner));
        assert!(!TaskCheck::contains_task(&m, quiet));
        assert!(TaskCheck::contains_task(&m, loud));
    }
}
