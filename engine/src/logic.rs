//! The Logic Engine: the engine capability set on top of the register-level
//! control protocol.
use crate::engine::{Engine, Input, State, VId};
use crate::errors::{RuntimeError, RuntimeResult};
use crate::interface::{FId, SharedHost};
use crate::logging::{self, Logger};
use crate::program::Program;
use crate::substrate::Substrate;
use crate::var_table::{Control, VarTable};
use baa::{BitVecOps, BitVecValue};
use sluice_idx::IndexRef;
use sluice_ir::eval::{Snapshot, eval_infallible};
use sluice_ir::visitor::ReadVars;
use sluice_ir::{Expr, ExprIdx, Init, Task, VarIdx, VarKind};
use sluice_opt::analysis::AssignedVars;
use std::collections::HashMap;
use std::sync::Arc;

/// Drives one compiled module on a substrate.
pub struct LogicEngine<S> {
    program: Arc<Program>,
    table: VarTable<S>,
    host: SharedHost,
    logger: Logger,
    inputs: Vec<VarIdx>,
    outputs: Vec<VarIdx>,
    state: Vec<VarIdx>,
    there_were_tasks: bool,
    /// Descriptors of task arguments that no statement can change,
    /// resolved once by `finalize`.
    fds: HashMap<ExprIdx, FId>,
}

impl<S: Substrate> LogicEngine<S> {
    pub fn new(
        program: Arc<Program>,
        table: VarTable<S>,
        host: SharedHost,
        logger: Logger,
    ) -> Self {
        let module = &program.module;
        let inputs = module.inputs().collect();
        let outputs = module.outputs().collect();
        let state = module.state_vars().collect();
        Self {
            program,
            table,
            host,
            logger,
            inputs,
            outputs,
            state,
            there_were_tasks: false,
            fds: HashMap::new(),
        }
    }

    pub fn table_mut(&mut self) -> &mut VarTable<S> {
        &mut self.table
    }

    fn var(&self, id: VId) -> RuntimeResult<VarIdx> {
        let var = VarIdx::new(id as usize);
        self.program
            .module
            .vars
            .get(var)
            .map(|_| var)
            .ok_or_else(|| RuntimeError::UnknownVariable(id).into())
    }

    /// Evaluates a task argument against the current register values.
    fn eval(&mut self, expr: ExprIdx) -> RuntimeResult<u64> {
        let program = Arc::clone(&self.program);
        let mut env = Snapshot::default();
        for var in ReadVars::of(&program.module, expr) {
            env.insert(var, self.table.read_var(var)?);
        }
        Ok(eval_infallible(&program.module, expr, &mut env))
    }

    /// Like [Self::eval], but keeps every bit of a variable wider than a
    /// word.
    fn eval_bits(&mut self, expr: ExprIdx) -> RuntimeResult<BitVecValue> {
        let module = &self.program.module;
        if let Expr::Var(var) = module.exprs[expr] {
            return self.table.read_bits(var);
        }
        let width = module.width_of(expr).min(64);
        Ok(BitVecValue::from_u64(self.eval(expr)?, width))
    }

    fn fd(&mut self, expr: ExprIdx) -> RuntimeResult<FId> {
        match self.fds.get(&expr) {
            Some(fd) => Ok(*fd),
            None => self.eval(expr),
        }
    }

    fn set_feof_mask(&mut self, fd: FId, eof: bool) -> RuntimeResult<()> {
        let fid = fd & 0x7fff_ffff;
        self.table.write_control(Control::Feof, (fid << 1) | eof as u64)
    }

    fn reset_then_resume(
        &mut self,
        write: impl FnOnce(&mut Self) -> RuntimeResult<()>,
    ) -> RuntimeResult<()> {
        // pause execution and drop updates
        self.table.write_control(Control::Reset, 1)?;
        write(self)?;
        // clear anything the writes buffered, then continue
        self.table.write_control(Control::Reset, 1)?;
        self.table.write_control(Control::Resume, 1)
    }

    /// Waits for the substrate to pause and services the pending task, if
    /// any. Returns whether there was one.
    fn handle_tasks(&mut self) -> RuntimeResult<bool> {
        while self.table.read_control(Control::Wait)? != 0 {}

        let raw = self.table.read_control(Control::TaskId)?;
        if raw == 0 {
            return Ok(false);
        }
        let program = Arc::clone(&self.program);
        let (_, task) = program.task(raw)?;
        logging::trace!(
            self.logger,
            "task";
            "id" => raw,
            "kind" => task.name()
        );
        match task {
            Task::Debug { action, text } => {
                self.host.lock().interface().debug(*action, text);
            }
            Task::Finish { arg } => {
                let arg = self.eval(*arg)? as u32;
                self.host.lock().interface().finish(arg);
                self.there_were_tasks = true;
            }
            Task::Fflush { fd } => {
                let fd = self.fd(*fd)?;
                let eof = {
                    let mut host = self.host.lock();
                    host.clear(fd)?;
                    host.flush(fd)?;
                    host.eof(fd)?
                };
                self.set_feof_mask(fd, eof)?;
            }
            Task::Fseek { fd, offset, whence } => {
                let fd = self.fd(*fd)?;
                let offset = self.eval(*offset)?;
                let eof = {
                    let mut host = self.host.lock();
                    host.clear(fd)?;
                    host.seek(fd, offset, *whence)?;
                    host.eof(fd)?
                };
                self.set_feof_mask(fd, eof)?;
            }
            Task::Get { fd, var, radix } => {
                let fd = self.fd(*fd)?;
                let width = var.map_or(64, |v| program.module.vars[v].width);
                let (value, eof) = {
                    let mut host = self.host.lock();
                    let value = host.scanf(fd, width, *radix)?;
                    (value, host.eof(fd)?)
                };
                if let (Some(var), Some(value)) = (var, value) {
                    self.table.write_bits(*var, &value)?;
                }
                if eof {
                    self.set_feof_mask(fd, true)?;
                }
            }
            Task::Put { fd, expr, radix } => {
                let fd = self.fd(*fd)?;
                let value = self.eval_bits(*expr)?;
                let eof = {
                    let mut host = self.host.lock();
                    host.printf(fd, &value, *radix)?;
                    host.eof(fd)?
                };
                if eof {
                    self.set_feof_mask(fd, true)?;
                }
            }
            Task::Restart { path } => {
                self.host.lock().interface().restart(path);
                self.there_were_tasks = true;
            }
            Task::Retarget { target } => {
                self.host.lock().interface().retarget(target);
                self.there_were_tasks = true;
            }
            Task::Save { path } => {
                self.host.lock().interface().save(path);
                self.there_were_tasks = true;
            }
            Task::Yield => {
                self.host.lock().interface().yield_now();
                self.there_were_tasks = true;
            }
        }
        Ok(true)
    }

    fn drain_tasks(&mut self) -> RuntimeResult<()> {
        while self.handle_tasks()? {
            self.table.write_control(Control::Resume, 1)?;
        }
        Ok(())
    }
}

impl<S: Substrate> Engine for LogicEngine<S> {
    fn get_state(&mut self) -> RuntimeResult<State> {
        let mut state = State::new();
        for var in self.state.clone() {
            state.insert(var.index() as VId, self.table.read_bits(var)?);
        }
        Ok(state)
    }

    fn set_state(&mut self, state: &State) -> RuntimeResult<()> {
        let vars = self.state.clone();
        self.reset_then_resume(|this| {
            for var in vars {
                if let Some(value) = state.get(&(var.index() as VId)) {
                    this.table.write_bits(var, value)?;
                }
            }
            Ok(())
        })
    }

    fn get_input(&mut self) -> RuntimeResult<Input> {
        let mut input = Input::new();
        for var in self.inputs.clone() {
            input.insert(var.index() as VId, self.table.read_bits(var)?);
        }
        Ok(input)
    }

    fn set_input(&mut self, input: &Input) -> RuntimeResult<()> {
        let vars = self.inputs.clone();
        self.reset_then_resume(|this| {
            for var in vars {
                if let Some(value) = input.get(&(var.index() as VId)) {
                    this.table.write_bits(var, value)?;
                }
            }
            Ok(())
        })
    }

    fn finalize(&mut self) -> RuntimeResult<()> {
        let program = Arc::clone(&self.program);
        let module = &program.module;
        for (var, decl) in module.vars.iter() {
            match &decl.init {
                Some(Init::Value(v)) => {
                    let value = BitVecValue::from_u64(
                        v & sluice_utils::mask(decl.width.min(64)),
                        decl.width.min(64),
                    );
                    self.table.write_bits(var, &value)?;
                }
                Some(Init::Fopen(path)) => {
                    let fd = self.host.lock().interface().fopen(path)?;
                    self.table.write_var(var, &[fd])?;
                    let eof = {
                        let mut host = self.host.lock();
                        host.peek(fd)?;
                        host.eof(fd)?
                    };
                    self.set_feof_mask(fd, eof)?;
                    logging::debug!(
                        self.logger,
                        "opened `{}'", path;
                        "fd" => fd
                    );
                }
                None => (),
            }
        }

        let assigned = AssignedVars::new(module);
        for (id, _) in program.tasks.iter() {
            let Some(fd) = program.tasks.task(module, id).and_then(Task::fd)
            else {
                continue;
            };
            let fixed = ReadVars::of(module, fd).into_iter().all(|v| {
                module.vars[v].kind != VarKind::Input && !assigned.contains(v)
            });
            if fixed {
                let value = self.eval(fd)?;
                self.fds.insert(fd, value);
            }
        }
        Ok(())
    }

    fn read(&mut self, id: VId, bits: &BitVecValue) -> RuntimeResult<()> {
        let var = self.var(id)?;
        if self.program.module.vars[var].kind != VarKind::Input {
            return Err(RuntimeError::UnknownVariable(id).into());
        }
        self.table.write_bits(var, bits)
    }

    fn evaluate(&mut self) -> RuntimeResult<()> {
        self.there_were_tasks = false;
        self.drain_tasks()?;
        for var in self.outputs.clone() {
            let value = self.table.read_bits(var)?;
            self.host.lock().interface().write(var.index() as VId, &value);
        }
        Ok(())
    }

    fn there_are_updates(&mut self) -> RuntimeResult<bool> {
        Ok(self.table.read_control(Control::ThereAreUpdates)? != 0)
    }

    fn update(&mut self) -> RuntimeResult<()> {
        self.table.write_control(Control::ApplyUpdate, 1)?;
        self.evaluate()
    }

    fn there_were_tasks(&mut self) -> RuntimeResult<bool> {
        Ok(self.there_were_tasks)
    }

    /// Fails for modules without an open-loop clock, since no substrate
    /// could spend the budget.
    fn open_loop(
        &mut self,
        _clk: VId,
        _val: bool,
        itr: u32,
    ) -> RuntimeResult<u32> {
        if self.program.module.open_loop_clock().is_none() {
            return Err(RuntimeError::Unsupported(format!(
                "open loop on `{}' without a lone one-bit clock input",
                self.program.module.name
            ))
            .into());
        }
        // the substrate owns the clock; only the budget matters
        self.there_were_tasks = false;
        self.table.write_control(Control::OpenLoop, itr as u64)?;
        while self.handle_tasks()? && !self.there_were_tasks {
            self.table.write_control(Control::Resume, 1)?;
        }
        if !self.there_were_tasks {
            return Ok(itr);
        }
        // The budget is spent at the start of each tick, so the remaining
        // count excludes the tick the task fired in.
        let remaining = self.table.read_control(Control::OpenLoop)?;
        self.table.write_control(Control::OpenLoop, 0)?;
        self.table.write_control(Control::Resume, 1)?;
        self.drain_tasks()?;
        Ok(itr.saturating_sub(remaining as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sim::HostPort;
    use crate::configuration::RuntimeConfig;
    use crate::interface::{Host, HostEvent, LocalInterface};
    use crate::substrate::SimSubstrate;
    use sluice_ir::{BinOp, Builder, Event, Module, Radix, StmtIdx};
    use sluice_opt::IoMode;

    type SimEngine = LogicEngine<SimSubstrate>;

    fn start(
        module: Module,
        local: &LocalInterface,
        mode: IoMode,
    ) -> SimEngine {
        let config = RuntimeConfig::builder().io_mode(mode).build();
        let program = Arc::new(
            Program::lower(module, &config, &logging::discard()).unwrap(),
        );
        let host = Host::shared(local.clone());
        let mut sim =
            SimSubstrate::new(Arc::clone(&program), config.max_cycles_per_poll);
        if mode == IoMode::Handshake {
            sim.set_port(Box::new(HostPort::new(
                Arc::clone(&program),
                Arc::clone(&host),
            )));
        }
        let table = VarTable::new(program.layout.clone(), sim);
        let mut engine =
            LogicEngine::new(program, table, host, logging::discard());
        engine.finalize().unwrap();
        engine
    }

    fn set_clock(engine: &mut SimEngine, clk: VarIdx, level: u64) {
        engine
            .read(clk.index() as VId, &BitVecValue::from_u64(level, 1))
            .unwrap();
        engine.evaluate().unwrap();
    }

    fn tick(engine: &mut SimEngine, clk: VarIdx) {
        set_clock(engine, clk, 1);
        set_clock(engine, clk, 0);
    }

    fn value_of(engine: &mut SimEngine, var: VarIdx) -> Option<u64> {
        engine.get_state().unwrap()[&(var.index() as VId)].to_u64()
    }

    /// `clk` and an 8-bit register, with `body` run on every rising edge.
    fn clocked(
        body: impl FnOnce(&mut Builder, VarIdx) -> Vec<StmtIdx>,
    ) -> (Module, VarIdx, VarIdx) {
        let mut m = Module::new("top");
        let mut b = Builder::new(&mut m);
        let clk = b.input("clk", 1);
        let x = b.reg("x", 8);
        let stmts = body(&mut b, x);
        let body = b.seq(stmts);
        b.always(vec![Event::posedge(clk)], body);
        (m, clk, x)
    }

    fn put(b: &mut Builder, fd: u64, x: VarIdx) -> StmtIdx {
        let fd = b.constant(fd, 32);
        let expr = b.var(x);
        b.task(Task::Put {
            fd,
            expr,
            radix: Radix::Dec,
        })
    }

    fn get(b: &mut Builder, fd: u64, x: VarIdx) -> StmtIdx {
        let fd = b.constant(fd, 32);
        b.task(Task::Get {
            fd,
            var: Some(x),
            radix: Radix::Dec,
        })
    }

    fn increment(b: &mut Builder, x: VarIdx) -> StmtIdx {
        let cur = b.var(x);
        let one = b.constant(1, 8);
        let next = b.binary(BinOp::Add, cur, one);
        b.assign(x, next)
    }

    fn stream_in_order(mode: IoMode) {
        let (m, clk, x) = clocked(|b, x| {
            vec![put(b, 7, x), get(b, 8, x), put(b, 7, x)]
        });
        let local = LocalInterface::new().with_stream(8, b"42");
        let mut engine = start(m, &local, mode);
        tick(&mut engine, clk);
        assert_eq!(local.contents(7), b"042");
        assert_eq!(value_of(&mut engine, x), Some(42));
        assert!(!engine.there_were_tasks().unwrap());
    }

    #[test]
    fn stream_tasks_run_in_program_order() {
        stream_in_order(IoMode::Tasks);
    }

    #[test]
    fn handshake_streams_match_the_task_path() {
        stream_in_order(IoMode::Handshake);
    }

    #[test]
    fn caller_visible_tasks_are_reported() {
        let (m, clk, x) = clocked(|b, x| {
            let save = b.task(Task::Save {
                path: "snap.json".to_string(),
            });
            vec![save, increment(b, x)]
        });
        let local = LocalInterface::new();
        let mut engine = start(m, &local, IoMode::Tasks);
        set_clock(&mut engine, clk, 1);
        assert!(engine.there_were_tasks().unwrap());
        assert_eq!(local.events(), vec![HostEvent::Save("snap.json".into())]);
        assert_eq!(value_of(&mut engine, x), Some(1));
        set_clock(&mut engine, clk, 0);
        assert!(!engine.there_were_tasks().unwrap());
    }

    #[test]
    fn restoring_a_snapshot_is_a_no_op() {
        let (m, clk, x) = clocked(|b, x| vec![increment(b, x)]);
        let mut engine = start(m, &LocalInterface::new(), IoMode::Tasks);
        tick(&mut engine, clk);
        tick(&mut engine, clk);
        let state = engine.get_state().unwrap();
        engine.set_state(&state).unwrap();
        assert_eq!(engine.get_state().unwrap(), state);
        assert_eq!(value_of(&mut engine, x), Some(2));

        let mut other = State::new();
        other.insert(x.index() as VId, BitVecValue::from_u64(9, 8));
        engine.set_state(&other).unwrap();
        tick(&mut engine, clk);
        assert_eq!(value_of(&mut engine, x), Some(10));
    }

    #[test]
    fn only_inputs_can_be_read() {
        let (m, _, x) = clocked(|b, x| vec![increment(b, x)]);
        let mut engine = start(m, &LocalInterface::new(), IoMode::Tasks);
        let err = engine
            .read(x.index() as VId, &BitVecValue::from_u64(1, 8))
            .unwrap_err();
        assert!(matches!(&*err, RuntimeError::UnknownVariable(_)));
        assert!(engine.read(99, &BitVecValue::from_u64(1, 1)).is_err());
    }

    #[test]
    fn updates_are_published_after_commit() {
        let mut m = Module::new("top");
        let mut b = Builder::new(&mut m);
        let clk = b.input("clk", 1);
        let out = b.output("out", 8);
        let nine = b.constant(9, 8);
        let write = b.nonblocking(out, nine);
        let body = b.seq(vec![write]);
        b.always(vec![Event::posedge(clk)], body);

        let local = LocalInterface::new();
        let mut engine = start(m, &local, IoMode::Tasks);
        set_clock(&mut engine, clk, 1);
        assert!(engine.there_are_updates().unwrap());
        assert!(engine.conditional_update().unwrap());
        assert!(!engine.there_are_updates().unwrap());
        let id = out.index() as VId;
        assert_eq!(
            local.events().last(),
            Some(&HostEvent::Write(id, BitVecValue::from_u64(9, 8)))
        );
        assert!(!engine.conditional_update().unwrap());
    }

    #[test]
    fn open_loop_runs_the_whole_budget_without_tasks() {
        let (m, clk, x) = clocked(|b, x| vec![increment(b, x)]);
        let mut engine = start(m, &LocalInterface::new(), IoMode::Tasks);
        let ran = engine.open_loop(clk.index() as VId, false, 5).unwrap();
        assert_eq!(ran, 5);
        assert_eq!(value_of(&mut engine, x), Some(5));
    }

    #[test]
    fn open_loop_stops_after_the_tick_of_a_task() {
        let (m, clk, x) = clocked(|b, x| {
            let bump = increment(b, x);
            let cur = b.var(x);
            let three = b.constant(3, 8);
            let cond = b.binary(BinOp::Eq, cur, three);
            let task = b.task(Task::Yield);
            let then = b.seq(vec![task]);
            let check = b.branch(cond, then, None);
            vec![bump, check]
        });
        let local = LocalInterface::new();
        let mut engine = start(m, &local, IoMode::Tasks);
        let ran = engine.open_loop(clk.index() as VId, false, 10).unwrap();
        assert_eq!(ran, 3);
        assert!(engine.there_were_tasks().unwrap());
        assert_eq!(local.events(), vec![HostEvent::Yield]);
        assert_eq!(value_of(&mut engine, x), Some(3));
    }

    #[test]
    fn open_loop_needs_a_clock_it_can_toggle() {
        let mut m = Module::new("top");
        let mut b = Builder::new(&mut m);
        let clk = b.input("clk", 1);
        let out = b.output("out", 8);
        let nine = b.constant(9, 8);
        let write = b.nonblocking(out, nine);
        let body = b.seq(vec![write]);
        b.always(vec![Event::posedge(clk)], body);

        let mut engine = start(m, &LocalInterface::new(), IoMode::Tasks);
        let err = engine.open_loop(clk.index() as VId, false, 4).unwrap_err();
        assert!(matches!(&*err, RuntimeError::Unsupported(_)));
        assert!(!engine.there_were_tasks().unwrap());
    }

    #[test]
    fn fopen_initializers_are_resolved_by_finalize() {
        let mut m = Module::new("top");
        let mut b = Builder::new(&mut m);
        let clk = b.input("clk", 1);
        let f = b.fopen("f", "in.txt");
        let x = b.reg("x", 8);
        let fd = b.var(f);
        let read = b.task(Task::Get {
            fd,
            var: Some(x),
            radix: Radix::Hex,
        });
        let body = b.seq(vec![read]);
        b.always(vec![Event::posedge(clk)], body);

        let local = LocalInterface::new().with_file("in.txt", b"1f");
        let mut engine = start(m, &local, IoMode::Tasks);
        assert_eq!(value_of(&mut engine, f), Some(6));
        tick(&mut engine, clk);
        assert_eq!(value_of(&mut engine, x), Some(0x1f));
    }
}
