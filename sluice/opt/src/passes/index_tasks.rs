use crate::analysis::TaskCheck;
use crate::traversal::Named;
use serde::{Deserialize, Serialize};
use sluice_idx::maps::IndexedMap;
use sluice_ir::{Builder, Lvalue, Module, Stmt, StmtIdx, Task, TaskIdx};
use sluice_utils::{Error, SluiceResult};
use std::collections::HashMap;

/// How formatted reads and writes reach the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoMode {
    /// `get` and `put` suspend the machine like every other task.
    #[default]
    Tasks,
    /// `get` and `put` stream 64-bit words through the read and write
    /// handshake registers.
    Handshake,
}

/// Ordered task descriptors. Index 0 is reserved for "no task pending", so
/// the first task has raw id 1. Entries are arena indices of the original
/// task statements.
#[derive(Debug, Clone, Default)]
pub struct TaskTable {
    tasks: IndexedMap<TaskIdx, StmtIdx>,
    by_stmt: HashMap<StmtIdx, TaskIdx>,
}

impl TaskTable {
    fn push(&mut self, stmt: StmtIdx) -> TaskIdx {
        let idx = self.tasks.push(stmt);
        self.by_stmt.insert(stmt, idx);
        idx
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// The statement of a task, if `task` was issued by this table.
    pub fn stmt(&self, task: TaskIdx) -> Option<StmtIdx> {
        self.tasks.get(task).copied()
    }

    pub fn task<'m>(
        &self,
        module: &'m Module,
        task: TaskIdx,
    ) -> Option<&'m Task> {
        match &module.stmts[self.stmt(task)?] {
            Stmt::Task(task) => Some(task),
            _ => None,
        }
    }

    /// The id assigned to a task statement.
    pub fn id_of(&self, stmt: StmtIdx) -> Option<TaskIdx> {
        self.by_stmt.get(&stmt).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TaskIdx, StmtIdx)> + '_ {
        self.tasks.iter().map(|(idx, stmt)| (idx, *stmt))
    }
}

/// Numbers every task of the clocked blocks in declaration order and turns
/// each task into an assignment of its id to the reserved task slot.
///
/// In [IoMode::Handshake] `get` and `put` keep their statement; machinify
/// lowers them into word handshakes using the id recorded here.
pub struct TaskIndexer {
    mode: IoMode,
}

impl Named for TaskIndexer {
    fn name() -> &'static str {
        "index-tasks"
    }

    fn description() -> &'static str {
        "assign ids to system tasks and replace them with task-slot writes"
    }
}

impl TaskIndexer {
    pub fn new(mode: IoMode) -> Self {
        Self { mode }
    }

    pub fn run(&self, module: &mut Module) -> SluiceResult<TaskTable> {
        let mut table = TaskTable::default();
        let blocks: Vec<_> = module.blocks.keys().collect();
        for block in blocks {
            let body = module.blocks[block].body;
            if !module.blocks[block].is_clocked() {
                if TaskCheck::contains_task(module, body) {
                    return Err(Error::pass_assumption(
                        Self::name(),
                        format!(
                            "always block {block} contains a task but is not sensitive to a clock edge"
                        ),
                    ));
                }
                continue;
            }
            let body = self.rewrite(module, &mut table, body)?;
            module.blocks[block].body = body;
        }
        log::debug!("indexed {} tasks in `{}'", table.len(), module.name);
        Ok(table)
    }

    fn keeps_statement(&self, task: &Task) -> bool {
        self.mode == IoMode::Handshake
            && matches!(task, Task::Get { .. } | Task::Put { .. })
    }

    /// Returns the statement that replaces `stmt` in its parent.
    fn rewrite(
        &self,
        module: &mut Module,
        table: &mut TaskTable,
        stmt: StmtIdx,
    ) -> SluiceResult<StmtIdx> {
        match module.stmts[stmt].clone() {
            Stmt::Task(task) => {
                if table.id_of(stmt).is_some() {
                    return Err(Error::malformed_structure(format!(
                        "task statement {stmt} is reachable twice"
                    )));
                }
                if table.len() + 1 >= sluice_ir::UNRESOLVED_TASK as usize {
                    return Err(Error::pass_assumption(
                        Self::name(),
                        "too many tasks for a 16-bit task id",
                    ));
                }
                let id = table.push(stmt);
                if self.keeps_statement(&task) {
                    return Ok(stmt);
                }
                let mut b = Builder::new(module);
                let raw = b.constant(id.raw() as u64, 16);
                Ok(b.assign(Lvalue::TaskSlot, raw))
            }
            Stmt::Seq(stmts) => {
                let stmts = stmts
                    .into_iter()
                    .map(|s| self.rewrite(module, table, s))
                    .collect::<SluiceResult<_>>()?;
                module.stmts[stmt] = Stmt::Seq(stmts);
                Ok(stmt)
            }
            Stmt::If { cond, then, els } => {
                let then = self.rewrite(module, table, then)?;
                let els = els
                    .map(|e| self.rewrite(module, table, e))
                    .transpose()?;
                module.stmts[stmt] = Stmt::If { cond, then, els };
                Ok(stmt)
            }
            Stmt::Case {
                cond,
                mut items,
                default,
            } => {
                for item in items.iter_mut() {
                    item.body = self.rewrite(module, table, item.body)?;
                }
                let default = default
                    .map(|d| self.rewrite(module, table, d))
                    .transpose()?;
                module.stmts[stmt] = Stmt::Case {
                    cond,
                    items,
                    default,
                };
                Ok(stmt)
            }
            Stmt::Assign { .. } | Stmt::Nonblocking { .. } => Ok(stmt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_ir::{Event, Expr, Radix};

    fn two_tasks() -> Module {
        let mut m = Module::new("t");
        let mut b = Builder::new(&mut m);
        let clk = b.input("clk", 1);
        let fd = b.constant(1, 32);
        let x = b.reg("x", 8);
        let xe = b.var(x);
        let put = b.task(Task::Put {
            fd,
            expr: xe,
            radix: Radix::Dec,
        });
        let save = b.task(Task::Save {
            path: "ckpt.bin".to_string(),
        });
        let body = b.seq(vec![put, save]);
        b.always(vec![Event::posedge(clk)], body);
        m
    }

    fn slot_ids(m: &Module) -> Vec<u64> {
        let body = m.blocks.values().next().unwrap().body;
        let Stmt::Seq(stmts) = &m.stmts[body] else {
            panic!("body is not a block")
        };
        stmts
            .iter()
            .filter_map(|s| match &m.stmts[*s] {
                Stmt::Assign {
                    lhs: Lvalue::TaskSlot,
                    rhs,
                } => match m.exprs[*rhs] {
                    Expr::Const { value, .. } => Some(value),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    #[test]
    fn tasks_mode_replaces_everything() {
        let mut m = two_tasks();
        let table = TaskIndexer::new(IoMode::Tasks).run(&mut m).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(slot_ids(&m), vec![1, 2]);
        let first = TaskIdx::from_raw(1).unwrap();
        assert_eq!(table.task(&m, first).map(Task::name), Some("put"));
    }

    #[test]
    fn handshake_mode_keeps_put() {
        let mut m = two_tasks();
        let table = TaskIndexer::new(IoMode::Handshake).run(&mut m).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(slot_ids(&m), vec![2]);
    }

    #[test]
    fn tasks_in_edge_blocks_are_rejected() {
        let mut m = Module::new("t");
        let mut b = Builder::new(&mut m);
        let x = b.input("x", 4);
        let y = b.task(Task::Yield);
        let body = b.seq(vec![y]);
        b.always(vec![Event::edge(x)], body);
        assert!(TaskIndexer::new(IoMode::Tasks).run(&mut m).is_err());
    }
}
