//! A software substrate that executes lowered state machines.
use super::Substrate;
use crate::errors::{RuntimeError, RuntimeResult};
use crate::program::Program;
use crate::var_table::Control;
use ahash::AHashMap;
use sluice_idx::IndexRef;
use sluice_idx::maps::IndexedMap;
use sluice_ir::eval::{Env, eval_infallible};
use sluice_ir::{
    BlockIdx, Init, Lvalue, Module, Signal, Stmt, StmtIdx, Task, TaskIdx,
    VarIdx,
};
use sluice_opt::Machine;
use sluice_utils::{mask, words_for};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;

/// Serves the word handshakes of lowered `get` and `put` tasks.
pub trait StreamPort: Send {
    /// Consumes the data words of one `put`. Returns the stream's
    /// end-of-file flag.
    fn put(
        &mut self,
        task: TaskIdx,
        fd: u64,
        words: &[u64],
    ) -> RuntimeResult<bool>;

    /// Produces the data words of one `get` together with the stream's
    /// end-of-file flag, or `None` to leave the read to the host.
    fn get(
        &mut self,
        task: TaskIdx,
        fd: u64,
    ) -> RuntimeResult<Option<(bool, Vec<u64>)>>;
}

const SIGNALS: usize = 10;

fn slot(signal: Signal) -> usize {
    match signal {
        Signal::State => 0,
        Signal::Paused => 1,
        Signal::TaskId => 2,
        Signal::FreadReq => 3,
        Signal::FreadData => 4,
        Signal::FwriteReq => 5,
        Signal::FwriteData => 6,
        Signal::Trigger => 7,
        Signal::Continue => 8,
        Signal::Reset => 9,
    }
}

/// Machine registers of one block.
#[derive(Debug, Clone, Copy, Default)]
struct Signals([u64; SIGNALS]);

impl Signals {
    fn get(&self, signal: Signal) -> u64 {
        self.0[slot(signal)]
    }

    fn set(&mut self, signal: Signal, value: u64) {
        self.0[slot(signal)] = value & mask(signal.width());
    }

    fn pending_task(&self) -> Option<u64> {
        let id = self.get(Signal::TaskId);
        let unresolved = sluice_ir::UNRESOLVED_TASK as u64;
        (self.get(Signal::Paused) != 0 && id != 0 && id != unresolved)
            .then_some(id)
    }
}

/// Destination of a write, resolved when the write is issued.
#[derive(Debug, Clone, Copy)]
enum Target {
    Var(VarIdx),
    Word(VarIdx, u32),
    Signal(Signal, BlockIdx),
    Feof(u64),
}

/// Everything an expression can read.
struct View<'a> {
    values: &'a IndexedMap<VarIdx, Vec<u64>>,
    signals: &'a [Signals],
    feof: &'a AHashMap<u64, bool>,
}

impl Env for View<'_> {
    type Error = Infallible;

    fn var(&mut self, var: VarIdx) -> Result<u64, Infallible> {
        Ok(self.values[var][0])
    }

    fn word(&mut self, var: VarIdx, word: u32) -> Result<u64, Infallible> {
        Ok(self.values[var].get(word as usize).copied().unwrap_or(0))
    }

    fn signal(
        &mut self,
        signal: Signal,
        block: BlockIdx,
    ) -> Result<u64, Infallible> {
        Ok(self.signals[block.index()].get(signal))
    }

    fn feof(&mut self, fd: u64) -> Result<bool, Infallible> {
        Ok(self.feof.get(&fd).copied().unwrap_or(false))
    }
}

/// Executes a [Program] in software.
///
/// A cycle settles the continuous assignments, detects the edges each
/// block is sensitive to, runs every untouched block that fired, and runs
/// one pass of every machine. Reading [Control::Wait] runs cycles until no
/// machine is runnable, no task is pending, and the open-loop budget is
/// spent.
pub struct SimSubstrate {
    program: Arc<Program>,
    values: IndexedMap<VarIdx, Vec<u64>>,
    signals: Vec<Signals>,
    /// Last observed low word of every variable a block is sensitive to.
    seen: AHashMap<VarIdx, u64>,
    feof: AHashMap<u64, bool>,
    updates: Vec<(Target, u64)>,
    clock: Option<VarIdx>,
    open_loop: u64,
    in_tick: bool,
    dirty: bool,
    max_cycles: u32,
    port: Option<Box<dyn StreamPort>>,
    puts: Vec<Vec<u64>>,
    reads: Vec<Option<VecDeque<u64>>>,
}

impl SimSubstrate {
    pub fn new(program: Arc<Program>, max_cycles: u32) -> Self {
        let module = &program.module;
        let values = module
            .vars
            .values()
            .map(|decl| {
                let mut words = vec![0; words_for(decl.width) as usize];
                if let Some(Init::Value(v)) = decl.init {
                    words[0] = v & mask(decl.width.min(64));
                }
                words
            })
            .collect();
        let blocks = module.blocks.len();
        let mut signals = vec![Signals::default(); blocks];
        for machine in &program.machines {
            signals[machine.block.index()]
                .set(Signal::State, machine.final_state as u64);
        }
        let mut this = Self {
            clock: module.open_loop_clock(),
            program: Arc::clone(&program),
            values,
            signals,
            seen: AHashMap::new(),
            feof: AHashMap::new(),
            updates: vec![],
            open_loop: 0,
            in_tick: false,
            dirty: true,
            max_cycles: max_cycles.max(1),
            port: None,
            puts: vec![vec![]; blocks],
            reads: vec![None; blocks],
        };
        for block in module.blocks.values() {
            for event in &block.events {
                let low = this.values[event.var][0];
                this.seen.insert(event.var, low);
            }
        }
        this
    }

    pub fn set_port(&mut self, port: Box<dyn StreamPort>) {
        self.port = Some(port);
    }

    fn view(&self) -> View<'_> {
        View {
            values: &self.values,
            signals: &self.signals,
            feof: &self.feof,
        }
    }

    fn eval(&self, module: &Module, expr: sluice_ir::ExprIdx) -> u64 {
        eval_infallible(module, expr, &mut self.view())
    }

    fn target(&self, module: &Module, lhs: &Lvalue) -> RuntimeResult<Target> {
        Ok(match lhs {
            Lvalue::Var(var) => Target::Var(*var),
            Lvalue::Word { var, word } => Target::Word(*var, *word),
            Lvalue::Signal { signal, block } => Target::Signal(*signal, *block),
            Lvalue::Feof(fd) => Target::Feof(self.eval(module, *fd)),
            Lvalue::TaskSlot => {
                return Err(RuntimeError::Unsupported(
                    "task slot written outside of a lowered machine".into(),
                )
                .into());
            }
        })
    }

    fn store(&mut self, module: &Module, target: Target, value: u64) {
        match target {
            Target::Var(var) => {
                let width = module.vars[var].width;
                let words = &mut self.values[var];
                words.fill(0);
                words[0] = value & mask(width.min(64));
                self.dirty = true;
            }
            Target::Word(var, word) => {
                self.write_word(module, var, word, value)
            }
            Target::Signal(signal, block) => {
                self.signals[block.index()].set(signal, value)
            }
            Target::Feof(fd) => {
                self.feof.insert(fd, value != 0);
            }
        }
    }

    fn write_word(
        &mut self,
        module: &Module,
        var: VarIdx,
        word: u32,
        value: u64,
    ) {
        let width = module.vars[var].width;
        let words = &mut self.values[var];
        if let Some(slot) = words.get_mut(word as usize) {
            let last = word + 1 == words_for(width);
            *slot = if last && width % 64 != 0 {
                value & mask(width % 64)
            } else {
                value
            };
            self.dirty = true;
        }
    }

    fn exec(&mut self, module: &Module, stmt: StmtIdx) -> RuntimeResult<()> {
        match &module.stmts[stmt] {
            Stmt::Seq(stmts) => {
                for s in stmts {
                    self.exec(module, *s)?;
                }
            }
            Stmt::Assign { lhs, rhs } => {
                let value = self.eval(module, *rhs);
                let target = self.target(module, lhs)?;
                self.store(module, target, value);
            }
            Stmt::Nonblocking { lhs, rhs } => {
                let value = self.eval(module, *rhs);
                let target = self.target(module, lhs)?;
                self.updates.push((target, value));
            }
            Stmt::If { cond, then, els } => {
                if self.eval(module, *cond) != 0 {
                    self.exec(module, *then)?;
                } else if let Some(els) = els {
                    self.exec(module, *els)?;
                }
            }
            Stmt::Case {
                cond,
                items,
                default,
            } => {
                let value = self.eval(module, *cond);
                let chosen = items
                    .iter()
                    .find(|item| {
                        item.matches
                            .iter()
                            .any(|m| self.eval(module, *m) == value)
                    })
                    .map(|item| item.body)
                    .or(*default);
                if let Some(body) = chosen {
                    self.exec(module, body)?;
                }
            }
            Stmt::Task(task) => {
                return Err(RuntimeError::Unsupported(format!(
                    "task `{}' reached the simulator without being lowered",
                    task.name()
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Applies continuous assignments until they stop changing anything.
    fn settle(&mut self, module: &Module) {
        for _ in 0..=module.assigns.len() {
            let mut changed = false;
            for assign in &module.assigns {
                let value = self.eval(module, assign.rhs);
                if self.values[assign.lhs][0] != value {
                    changed = true;
                    self.store(module, Target::Var(assign.lhs), value);
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn edges_pending(&self) -> bool {
        self.seen
            .iter()
            .any(|(var, low)| self.values[*var][0] != *low)
    }

    fn runnable(&self) -> bool {
        self.program.machines.iter().any(|m| {
            let s = &self.signals[m.block.index()];
            s.get(Signal::Paused) == 0
                && s.get(Signal::State) != m.final_state as u64
        })
    }

    fn pending_task(&self) -> Option<(usize, u64)> {
        self.program.machines.iter().find_map(|m| {
            let b = m.block.index();
            self.signals[b].pending_task().map(|id| (b, id))
        })
    }

    fn step(&mut self) -> RuntimeResult<()> {
        let program = Arc::clone(&self.program);
        let module = &program.module;
        self.dirty = false;
        self.settle(module);

        let fired: Vec<bool> = module
            .blocks
            .values()
            .map(|block| {
                block.events.iter().any(|e| {
                    let prev = self.seen.get(&e.var).copied().unwrap_or(0);
                    e.kind.fires(prev, self.values[e.var][0])
                })
            })
            .collect();
        for var in self.seen.keys().copied().collect::<Vec<_>>() {
            let low = self.values[var][0];
            self.seen.insert(var, low);
        }

        for (idx, block) in module.blocks.iter() {
            if !block.is_clocked() && fired[idx.index()] {
                self.exec(module, block.body)?;
            }
        }
        for machine in &program.machines {
            self.run_machine(&program, machine, fired[machine.block.index()])?;
        }
        self.settle(module);
        Ok(())
    }

    /// One pass of a machine, plus as many more as its word handshakes need.
    fn run_machine(
        &mut self,
        program: &Program,
        machine: &Machine,
        fired: bool,
    ) -> RuntimeResult<()> {
        let b = machine.block.index();
        self.signals[b].set(Signal::Trigger, fired as u64);
        self.exec(&program.module, machine.body)?;
        self.signals[b].set(Signal::Trigger, 0);
        while self.serve_handshake(program, machine)? {
            self.exec(&program.module, machine.body)?;
        }
        Ok(())
    }

    /// Answers a pending read or write request of a paused machine. Returns
    /// whether the machine may continue.
    fn serve_handshake(
        &mut self,
        program: &Program,
        machine: &Machine,
    ) -> RuntimeResult<bool> {
        let module = &program.module;
        let b = machine.block.index();
        let signals = self.signals[b];
        if signals.get(Signal::Paused) == 0 {
            return Ok(false);
        }
        if signals.get(Signal::FwriteReq) != 0 {
            self.puts[b].push(signals.get(Signal::FwriteData));
            let (task, put) = program.task(self.puts[b][0])?;
            let Task::Put { fd, expr, .. } = put else {
                return Err(RuntimeError::UnknownTask(self.puts[b][0]).into());
            };
            let expected = 1 + words_for(module.width_of(*expr)) as usize;
            if self.puts[b].len() == expected {
                let words = std::mem::take(&mut self.puts[b]);
                let fd = self.eval(module, *fd);
                let eof = match self.port.as_mut() {
                    Some(port) => port.put(task, fd, &words[1..])?,
                    None => false,
                };
                if eof {
                    self.feof.insert(fd, true);
                }
            }
            self.signals[b].set(Signal::Paused, 0);
            return Ok(true);
        }
        let raw = signals.get(Signal::FreadReq);
        if raw != 0 {
            let data = match self.reads[b].as_mut() {
                Some(queue) => {
                    let word = queue.pop_front().unwrap_or(0);
                    if queue.is_empty() {
                        self.reads[b] = None;
                    }
                    word
                }
                None => self.read_header(program, b, raw)?,
            };
            self.signals[b].set(Signal::FreadData, data);
            self.signals[b].set(Signal::Paused, 0);
            return Ok(true);
        }
        Ok(false)
    }

    /// The first word of a read: the task id echoed in the low 16 bits and
    /// the end-of-file flag in bit 16, or zero when the port declines.
    fn read_header(
        &mut self,
        program: &Program,
        b: usize,
        raw: u64,
    ) -> RuntimeResult<u64> {
        let module = &program.module;
        let (task, get) = program.task(raw)?;
        let Task::Get { fd, var, .. } = get else {
            return Err(RuntimeError::UnknownTask(raw).into());
        };
        let words = var.map_or(0, |v| words_for(module.vars[v].width) as usize);
        let fd = self.eval(module, *fd);
        let served = match self.port.as_mut() {
            Some(port) => port.get(task, fd)?,
            None => None,
        };
        Ok(match served {
            Some((eof, mut data)) => {
                data.resize(words, 0);
                if !data.is_empty() {
                    self.reads[b] = Some(data.into());
                }
                ((eof as u64) << 16) | raw
            }
            None => 0,
        })
    }

    fn commit_updates(&mut self) {
        let program = Arc::clone(&self.program);
        for (target, value) in std::mem::take(&mut self.updates) {
            self.store(&program.module, target, value);
        }
        self.dirty = true;
    }

    /// Runs one pass of `machines` with `signal` raised.
    fn pulse(&mut self, signal: Signal, blocks: &[usize]) -> RuntimeResult<()> {
        let program = Arc::clone(&self.program);
        for machine in &program.machines {
            let b = machine.block.index();
            if blocks.contains(&b) {
                self.signals[b].set(signal, 1);
                self.exec(&program.module, machine.body)?;
                self.signals[b].set(signal, 0);
            }
        }
        self.dirty = true;
        Ok(())
    }

    fn reset(&mut self) -> RuntimeResult<()> {
        self.updates.clear();
        self.puts.iter_mut().for_each(Vec::clear);
        self.reads.iter_mut().for_each(|r| *r = None);
        let all: Vec<_> = self
            .program
            .machines
            .iter()
            .map(|m| m.block.index())
            .collect();
        self.pulse(Signal::Reset, &all)
    }

    fn resume(&mut self) -> RuntimeResult<()> {
        let blocks: Vec<_> = match self.pending_task() {
            Some((b, _)) => vec![b],
            None => self
                .program
                .machines
                .iter()
                .map(|m| m.block.index())
                .filter(|b| self.signals[*b].get(Signal::Paused) != 0)
                .collect(),
        };
        self.pulse(Signal::Continue, &blocks)
    }

    /// Runs until quiescent. Returns non-zero if the cycle bound ran out
    /// first.
    fn wait(&mut self) -> RuntimeResult<u64> {
        for _ in 0..self.max_cycles {
            if self.pending_task().is_some() {
                return Ok(0);
            }
            if self.dirty || self.runnable() || self.edges_pending() {
                self.step()?;
                continue;
            }
            let Some(clk) =
                self.clock.filter(|_| self.in_tick || self.open_loop > 0)
            else {
                return Ok(0);
            };
            let high = self.values[clk][0] != 0;
            if self.in_tick && !self.updates.is_empty() {
                self.commit_updates();
            } else if self.in_tick {
                // falling edge ends the tick
                self.values[clk][0] = 0;
                self.in_tick = false;
                self.dirty = true;
            } else if high {
                self.values[clk][0] = 0;
                self.dirty = true;
            } else {
                self.open_loop -= 1;
                self.values[clk][0] = 1;
                self.in_tick = true;
                self.dirty = true;
            }
        }
        Ok(1)
    }
}

impl Substrate for SimSubstrate {
    fn read(&mut self, addr: u64) -> RuntimeResult<u64> {
        match Control::from_addr(addr) {
            Some(Control::Wait) => self.wait(),
            Some(Control::OpenLoop) => Ok(self.open_loop),
            Some(Control::ThereAreUpdates) => {
                Ok(!self.updates.is_empty() as u64)
            }
            Some(Control::TaskId) => {
                Ok(self.pending_task().map_or(0, |(_, id)| id))
            }
            Some(_) => Ok(0),
            None => Ok(self
                .program
                .layout
                .decode(addr)
                .map_or(0, |(var, word)| self.values[var][word as usize])),
        }
    }

    fn write(&mut self, addr: u64, value: u64) -> RuntimeResult<()> {
        match Control::from_addr(addr) {
            Some(Control::Reset) => self.reset(),
            Some(Control::Resume) => self.resume(),
            Some(Control::OpenLoop) => {
                self.open_loop = value;
                Ok(())
            }
            Some(Control::ApplyUpdate) => {
                self.commit_updates();
                Ok(())
            }
            Some(Control::Feof) => {
                self.feof.insert(value >> 1, value & 1 == 1);
                Ok(())
            }
            Some(
                Control::Wait | Control::ThereAreUpdates | Control::TaskId,
            ) => Ok(()),
            None => {
                if let Some((var, word)) = self.program.layout.decode(addr) {
                    let program = Arc::clone(&self.program);
                    self.write_word(&program.module, var, word, value);
                }
                Ok(())
            }
        }
    }
}
