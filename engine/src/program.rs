use crate::configuration::RuntimeConfig;
use crate::errors::{RuntimeError, RuntimeResult};
use crate::logging::{self, Logger};
use crate::var_table::VarLayout;
use sluice_ir::{Module, Task, TaskIdx};
use sluice_opt::{Machine, Machinify, TaskIndexer, TaskTable};

/// A module lowered for execution: the rewritten tree, its task table, one
/// state machine per clocked block, and the register layout. Everything
/// refers to the module's arenas by index, so the unit is freed as a whole.
#[derive(Debug)]
pub struct Program {
    pub module: Module,
    pub tasks: TaskTable,
    pub machines: Vec<Machine>,
    pub layout: VarLayout,
}

impl Program {
    pub fn lower(
        mut module: Module,
        config: &RuntimeConfig,
        logger: &Logger,
    ) -> RuntimeResult<Self> {
        module.validate()?;
        let tasks = TaskIndexer::new(config.io_mode).run(&mut module)?;
        let machines = Machinify::run(&mut module, &tasks)?;
        if config.dump_machines {
            for machine in &machines {
                logging::info!(logger, "{}", machine.dump(&module));
            }
        }
        logging::debug!(
            logger,
            "lowered `{}'", module.name;
            "tasks" => tasks.len(),
            "machines" => machines.len()
        );
        let layout = VarLayout::new(&module);
        Ok(Self {
            module,
            tasks,
            machines,
            layout,
        })
    }

    /// Looks up a task by the raw id a substrate reports.
    pub fn task(&self, raw: u64) -> RuntimeResult<(TaskIdx, &Task)> {
        u16::try_from(raw)
            .ok()
            .and_then(TaskIdx::from_raw)
            .and_then(|idx| Some((idx, self.tasks.task(&self.module, idx)?)))
            .ok_or_else(|| RuntimeError::UnknownTask(raw).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_ir::{Builder, Event};

    #[test]
    fn lowering_indexes_tasks_from_one() {
        let mut m = Module::new("m");
        let mut b = Builder::new(&mut m);
        let clk = b.input("clk", 1);
        let save = b.task(Task::Save {
            path: "a".to_string(),
        });
        let body = b.seq(vec![save]);
        b.always(vec![Event::posedge(clk)], body);
        let program =
            Program::lower(m, &RuntimeConfig::default(), &logging::discard())
                .unwrap();
        assert_eq!(program.machines.len(), 1);
        assert!(matches!(program.task(1).unwrap().1, Task::Save { .. }));
        assert!(program.task(0).is_err());
        assert!(program.task(2).is_err());
        assert!(program.task(1 << 20).is_err());
    }
}
