use sluice_ir::visitor::{Action, Visitor, walk_stmt};
use sluice_ir::{Lvalue, Module, Stmt, StmtIdx, Task, VarIdx};
use std::collections::HashSet;

/// The set of variables the module ever writes, through assignments,
/// formatted reads or continuous assignments. Variables outside this set
/// keep their initial value for the lifetime of an engine.
#[derive(Debug, Default)]
pub struct AssignedVars {
    vars: HashSet<VarIdx>,
}

impl AssignedVars {
    pub fn new(module: &Module) -> Self {
        let mut analysis = Self::default();
        for (_, block) in module.blocks.iter() {
            walk_stmt(&mut analysis, module, block.body);
        }
        analysis.vars.extend(module.assigns.iter().map(|a| a.lhs));
        analysis
    }

    pub fn contains(&self, var: VarIdx) -> bool {
        self.vars.contains(&var)
    }
}

impl Visitor for AssignedVars {
    fn start_stmt(&mut self, module: &Module, stmt: StmtIdx) -> Action {
        match &module.stmts[stmt] {
            Stmt::Assign { lhs, .. } | Stmt::Nonblocking { lhs, .. } => {
                if let Lvalue::Var(var) | Lvalue::Word { var, .. } = lhs {
                    self.vars.insert(*var);
                }
            }
            Stmt::Task(Task::Get { var: Some(var), .. }) => {
                self.vars.insert(*var);
            }
            _ => (),
        }
        Action::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_ir::{Builder, Event, Radix};

    #[test]
    fn collects_all_writes() {
        let mut m = Module::new("t");
        let mut b = Builder::new(&mut m);
        let clk = b.input("clk", 1);
        let fd = b.fopen("fd", "in.txt");
        let x = b.reg("x", 8);
        let y = b.reg("y", 8);
        let out = b.output("out", 8);
        let fde = b.var(fd);
        let get = b.task(Task::Get {
            fd: fde,
            var: Some(x),
            radix: Radix::Dec,
        });
        let xe = b.var(x);
        let set_y = b.nonblocking(y, xe);
        let body = b.seq(vec![get, set_y]);
        b.always(vec![Event::posedge(clk)], body);
        let ye = b.var(y);
        b.continuous(out, ye);

        let assigned = AssignedVars::new(&m);
        assert!(assigned.contains(x));
        assert!(assigned.contains(y));
        assert!(assigned.contains(out));
        assert!(!assigned.contains(fd));
        assert!(!assigned.contains(clk));
    }
}
