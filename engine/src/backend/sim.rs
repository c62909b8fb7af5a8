//! The software back end: lowered machines run on a [SimSubstrate] inside
//! the server process.
use super::{Backend, CompileJob};
use crate::bits;
use crate::engine::Engine;
use crate::errors::{RuntimeError, RuntimeResult};
use crate::interface::SharedHost;
use crate::logging;
use crate::logic::LogicEngine;
use crate::program::Program;
use crate::substrate::{SimSubstrate, StreamPort};
use crate::var_table::VarTable;
use sluice_ir::{Task, TaskIdx};
use sluice_opt::IoMode;
use std::sync::Arc;

#[derive(Debug, Default, Clone, Copy)]
pub struct SimBackend;

impl Backend for SimBackend {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn compile(&self, job: CompileJob) -> RuntimeResult<Box<dyn Engine>> {
        let program =
            Arc::new(Program::lower(job.module, &job.config, &job.logger)?);
        job.cancel.check()?;
        let mut sim = SimSubstrate::new(
            Arc::clone(&program),
            job.config.max_cycles_per_poll,
        );
        if job.config.io_mode == IoMode::Handshake {
            sim.set_port(Box::new(HostPort::new(
                Arc::clone(&program),
                Arc::clone(&job.host),
            )));
        }
        logging::info!(
            job.logger,
            "compiled `{}'", program.module.name;
            "backend" => self.name()
        );
        let table = VarTable::new(program.layout.clone(), sim);
        Ok(Box::new(LogicEngine::new(program, table, job.host, job.logger)))
    }
}

/// Serves word handshakes from the caller's streams, formatting values the
/// same way the task path does.
pub struct HostPort {
    program: Arc<Program>,
    host: SharedHost,
}

impl HostPort {
    pub fn new(program: Arc<Program>, host: SharedHost) -> Self {
        Self { program, host }
    }

    fn task(&self, task: TaskIdx) -> RuntimeResult<&Task> {
        self.program
            .tasks
            .task(&self.program.module, task)
            .ok_or_else(|| RuntimeError::UnknownTask(task.raw() as u64).into())
    }
}

impl StreamPort for HostPort {
    fn put(
        &mut self,
        task: TaskIdx,
        fd: u64,
        words: &[u64],
    ) -> RuntimeResult<bool> {
        let program = Arc::clone(&self.program);
        let Task::Put { expr, radix, .. } = self.task(task)? else {
            return Err(RuntimeError::UnknownTask(task.raw() as u64).into());
        };
        let value = bits::from_words(words, program.module.width_of(*expr));
        let mut host = self.host.lock();
        host.printf(fd, &value, *radix)?;
        Ok(host.eof(fd)?)
    }

    fn get(
        &mut self,
        task: TaskIdx,
        fd: u64,
    ) -> RuntimeResult<Option<(bool, Vec<u64>)>> {
        let program = Arc::clone(&self.program);
        let Task::Get { var, radix, .. } = self.task(task)? else {
            return Err(RuntimeError::UnknownTask(task.raw() as u64).into());
        };
        let width = var.map_or(64, |v| program.module.vars[v].width);
        let mut host = self.host.lock();
        // a failed conversion goes back to the task path, which leaves the
        // destination alone
        let Some(value) = host.scanf(fd, width, *radix)? else {
            return Ok(None);
        };
        let words = match var {
            Some(_) => bits::to_words(&value, width),
            None => vec![],
        };
        Ok(Some((host.eof(fd)?, words)))
    }
}
