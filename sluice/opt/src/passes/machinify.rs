use crate::analysis::TaskCheck;
use crate::passes::TaskTable;
use crate::traversal::Named;
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Dfs;
use sluice_ir::visitor::{Action, Visitor, walk_stmt};
use sluice_ir::{
    BinOp, BlockIdx, Builder, CaseItem, Event, Expr, ExprIdx, Lvalue, Module,
    Printer, Signal, Stmt, StmtIdx, Task, TaskIdx, UNRESOLVED_TASK, UnOp,
    VarIdx,
};
use sluice_utils::{Error, SluiceResult, words_for};
use std::fmt::Write;

/// A clocked block lowered into numbered states.
///
/// Executing [Machine::body] once is one cycle of the block: the prologue
/// restarts the machine at state 0 when the block's sensitivity list fires,
/// every state whose number matches the state register runs unless the
/// machine is paused, and the epilogue applies reset and continue.
/// Transitions are blocking writes of the state register, so a machine runs
/// through as many states as it can in one cycle and only stops at a pause.
#[derive(Debug, Clone)]
pub struct Machine {
    pub block: BlockIdx,
    pub events: Vec<Event>,
    /// The guarded conditional of every state, indexed by state number.
    pub states: Vec<StmtIdx>,
    pub final_state: u32,
    /// States that suspend on a task, and the task they suspend on.
    pub task_states: Vec<(u32, TaskIdx)>,
    pub body: StmtIdx,
}

impl Machine {
    /// Every `(from, to)` edge written by a state.
    pub fn transitions(&self, module: &Module) -> Vec<(u32, u32)> {
        let mut edges = vec![];
        for (from, state) in self.states.iter().enumerate() {
            let mut targets = Targets {
                block: self.block,
                found: vec![],
            };
            // the guard's then-branch holds the state's statements
            if let Stmt::If { then, .. } = &module.stmts[*state] {
                walk_stmt(&mut targets, module, *then);
            }
            edges.extend(targets.found.into_iter().map(|to| (from as u32, to)));
        }
        edges
    }

    /// Checks that every transition target is a state of this machine and
    /// that every state is reachable from state 0.
    pub fn validate(&self, module: &Module) -> SluiceResult<()> {
        let count = self.states.len() as u32;
        let mut graph = DiGraphMap::<u32, ()>::new();
        for state in 0..count {
            graph.add_node(state);
        }
        for (from, to) in self.transitions(module) {
            if to >= count {
                return Err(Error::malformed_structure(format!(
                    "block {}: state {from} transitions to {to} but only {count} states exist",
                    self.block
                )));
            }
            graph.add_edge(from, to, ());
        }
        let mut dfs = Dfs::new(&graph, 0);
        let mut reached = 0;
        while dfs.next(&graph).is_some() {
            reached += 1;
        }
        if reached != count {
            return Err(Error::malformed_structure(format!(
                "block {}: {} of {count} states are unreachable",
                self.block,
                count - reached
            )));
        }
        Ok(())
    }

    pub fn dump(&self, module: &Module) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "machine for block {} ({} states, final {})",
            self.block,
            self.states.len(),
            self.final_state
        );
        for (task_state, task) in &self.task_states {
            let _ =
                writeln!(out, "  task {task} suspends in state {task_state}");
        }
        out.push_str(&Printer::stmt_to_string(module, self.body));
        out
    }
}

/// Collects constant targets of state-register writes.
struct Targets {
    block: BlockIdx,
    found: Vec<u32>,
}

impl Targets {
    fn constants(module: &Module, expr: ExprIdx, out: &mut Vec<u32>) {
        match &module.exprs[expr] {
            Expr::Const { value, .. } => out.push(*value as u32),
            Expr::Cond { then, els, .. } => {
                Self::constants(module, *then, out);
                Self::constants(module, *els, out);
            }
            _ => (),
        }
    }
}

impl Visitor for Targets {
    fn start_stmt(&mut self, module: &Module, stmt: StmtIdx) -> Action {
        if let Stmt::Assign {
            lhs:
                Lvalue::Signal {
                    signal: Signal::State,
                    block,
                },
            rhs,
        } = &module.stmts[stmt]
        {
            if *block == self.block {
                Self::constants(module, *rhs, &mut self.found);
            }
        }
        Action::Continue
    }
}

/// Lowers every clocked always block into an explicit state machine.
///
/// Expects [TaskIndexer](crate::TaskIndexer) to have run: tasks are either
/// writes of the reserved task slot, or (handshake I/O) indexed `get` and
/// `put` statements.
pub struct Machinify;

impl Named for Machinify {
    fn name() -> &'static str {
        "machinify"
    }

    fn description() -> &'static str {
        "lower blocking control flow of clocked blocks into numbered states"
    }
}

impl Machinify {
    pub fn run(
        module: &mut Module,
        tasks: &TaskTable,
    ) -> SluiceResult<Vec<Machine>> {
        let blocks: Vec<_> = module
            .blocks
            .iter()
            .filter(|(_, block)| block.is_clocked())
            .map(|(idx, _)| idx)
            .collect();
        let machines = blocks
            .into_iter()
            .map(|block| Generate::lower(module, tasks, block))
            .collect::<SluiceResult<Vec<_>>>()?;
        log::debug!(
            "lowered {} blocks of `{}' into {} states",
            machines.len(),
            module.name,
            machines.iter().map(|m| m.states.len()).sum::<usize>()
        );
        Ok(machines)
    }
}

/// Lowering state for one block. States are built as growing statement
/// lists and turned into guarded conditionals once the block is done.
struct Generate<'a> {
    module: &'a mut Module,
    tasks: &'a TaskTable,
    block: BlockIdx,
    states: Vec<Vec<StmtIdx>>,
    task_states: Vec<(u32, TaskIdx)>,
    /// Number of enclosing branches of the statement being visited.
    nesting: usize,
}

impl<'a> Generate<'a> {
    fn lower(
        module: &'a mut Module,
        tasks: &'a TaskTable,
        block: BlockIdx,
    ) -> SluiceResult<Machine> {
        let body = module.blocks[block].body;
        let events = module.blocks[block].events.clone();
        let mut this = Generate {
            module,
            tasks,
            block,
            states: vec![],
            task_states: vec![],
            nesting: 0,
        };
        this.next_state();
        let last = this.is_seq(body);
        this.visit(body, last)?;
        // reuse an empty current state as the terminal state
        if !this.states[this.current() as usize].is_empty() {
            let cur = this.current();
            this.transition(cur, cur + 1);
            this.next_state();
        }
        let final_state = this.current();
        this.transition(final_state, final_state);
        this.finish(events, final_state)
    }

    fn b(&mut self) -> Builder<'_> {
        Builder::new(self.module)
    }

    fn current(&self) -> u32 {
        (self.states.len() - 1) as u32
    }

    fn next_state(&mut self) -> u32 {
        self.states.push(vec![]);
        self.current()
    }

    fn append(&mut self, state: u32, stmt: StmtIdx) {
        self.states[state as usize].push(stmt);
    }

    fn append_current(&mut self, stmt: StmtIdx) {
        let cur = self.current();
        self.append(cur, stmt);
    }

    fn read(&mut self, signal: Signal) -> ExprIdx {
        let block = self.block;
        self.b().signal(signal, block)
    }

    fn set_expr(&mut self, signal: Signal, rhs: ExprIdx) -> StmtIdx {
        let lhs = Lvalue::Signal {
            signal,
            block: self.block,
        };
        self.b().assign(lhs, rhs)
    }

    fn set(&mut self, signal: Signal, value: u64) -> StmtIdx {
        let value = self.b().constant(value, signal.width());
        self.set_expr(signal, value)
    }

    fn transition(&mut self, from: u32, to: u32) {
        let stmt = self.set(Signal::State, to as u64);
        self.append(from, stmt);
    }

    fn is_seq(&self, stmt: StmtIdx) -> bool {
        matches!(self.module.stmts[stmt], Stmt::Seq(_))
    }

    fn is_empty(&self, stmt: Option<StmtIdx>) -> bool {
        match stmt {
            None => true,
            Some(s) => {
                matches!(&self.module.stmts[s], Stmt::Seq(v) if v.is_empty())
            }
        }
    }

    /// `last` is set when `stmt` ends the sequential block that forms a
    /// branch or the whole body. Nested blocks are flattened, so a
    /// statement is only last if every enclosing block also ends with it.
    fn visit(&mut self, stmt: StmtIdx, last: bool) -> SluiceResult<()> {
        match self.module.stmts[stmt].clone() {
            Stmt::Seq(stmts) => {
                let count = stmts.len();
                for (i, s) in stmts.into_iter().enumerate() {
                    self.visit(s, last && i + 1 == count)?;
                }
                Ok(())
            }
            Stmt::Assign {
                lhs: Lvalue::TaskSlot,
                rhs,
            } => self.task_boundary(rhs, last),
            Stmt::Assign { .. } | Stmt::Nonblocking { .. } => {
                self.append_current(stmt);
                Ok(())
            }
            Stmt::If { cond, then, els } => {
                if TaskCheck::contains_task(self.module, stmt) {
                    self.lower_if(cond, then, els, last)
                } else {
                    self.append_current(stmt);
                    Ok(())
                }
            }
            Stmt::Case {
                cond,
                items,
                default,
            } => {
                if TaskCheck::contains_task(self.module, stmt) {
                    self.lower_case(cond, items, default)
                } else {
                    self.append_current(stmt);
                    Ok(())
                }
            }
            Stmt::Task(task) => {
                let id = self.tasks.id_of(stmt).ok_or_else(|| {
                    Error::pass_assumption(
                        Machinify::name(),
                        format!("task `{}' was never indexed", task.name()),
                    )
                })?;
                match task {
                    Task::Get { fd, var, .. } => self.lower_get(id, fd, var),
                    Task::Put { expr, .. } => self.lower_put(id, expr),
                    other => Err(Error::pass_assumption(
                        Machinify::name(),
                        format!(
                            "task `{}' should have been replaced by a task-slot write",
                            other.name()
                        ),
                    )),
                }
            }
        }
    }

    /// Branch bodies are visited as if they were the end of a block when
    /// they are sequential blocks themselves.
    fn visit_branch(&mut self, body: StmtIdx) -> SluiceResult<()> {
        let last = self.is_seq(body);
        self.nesting += 1;
        let res = self.visit(body, last);
        self.nesting -= 1;
        res
    }

    fn task_boundary(&mut self, rhs: ExprIdx, last: bool) -> SluiceResult<()> {
        let task = match self.module.exprs[rhs] {
            Expr::Const { value, .. } => TaskIdx::from_raw(value as u16),
            _ => None,
        }
        .ok_or_else(|| {
            Error::pass_assumption(
                Machinify::name(),
                "task slot written with something other than a task id",
            )
        })?;
        let cur = self.current();
        let pause = self.set(Signal::Paused, 1);
        self.append(cur, pause);
        let tag = self.set_expr(Signal::TaskId, rhs);
        self.append(cur, tag);
        self.task_states.push((cur, task));
        if !last {
            self.transition(cur, cur + 1);
            self.next_state();
        }
        Ok(())
    }

    fn lower_if(
        &mut self,
        cond: ExprIdx,
        then: StmtIdx,
        els: Option<StmtIdx>,
        last: bool,
    ) -> SluiceResult<()> {
        let empty_else = self.is_empty(els);
        let begin = self.current();

        let then_begin = self.next_state();
        self.visit_branch(then)?;
        let then_end = self.current();

        if !empty_else {
            self.next_state();
        }
        let else_begin = self.current();
        if let Some(els) = els {
            self.visit_branch(els)?;
        }
        let else_end = self.current();

        // Without an else branch, an if that ends the whole body falls
        // through into the terminal state. Inside a branch the next state
        // belongs to a sibling, so a join is always needed there.
        let join = !empty_else || !last || self.nesting > 0;
        if join {
            self.next_state();
        }

        // An empty last state of the then branch becomes the terminal state
        // when there is no join.
        let otherwise = if !empty_else {
            else_begin
        } else if !join && self.states[then_end as usize].is_empty() {
            then_end
        } else {
            then_end + 1
        };
        let mut b = self.b();
        let then_target = b.constant(then_begin as u64, 32);
        let else_target = b.constant(otherwise as u64, 32);
        let target = b.cond(cond, then_target, else_target);
        let dispatch = self.set_expr(Signal::State, target);
        self.append(begin, dispatch);

        if join {
            let join_state = self.current();
            self.transition(then_end, join_state);
            if !empty_else {
                self.transition(else_end, join_state);
            }
        }
        Ok(())
    }

    fn lower_case(
        &mut self,
        cond: ExprIdx,
        items: Vec<CaseItem>,
        default: Option<StmtIdx>,
    ) -> SluiceResult<()> {
        let begin = self.current();
        let mut begins = vec![];
        let mut ends = vec![];
        for body in items.iter().map(|i| i.body).chain(default) {
            begins.push(self.next_state());
            self.visit_branch(body)?;
            ends.push(self.current());
        }
        let join = self.next_state();

        let mut dispatch_items = vec![];
        for (item, target) in items.iter().zip(&begins) {
            dispatch_items.push(CaseItem {
                matches: item.matches.clone(),
                body: self.set(Signal::State, *target as u64),
            });
        }
        let fallback = match default {
            Some(_) => begins[items.len()],
            None => join,
        };
        let dispatch_default = self.set(Signal::State, fallback as u64);
        let dispatch =
            self.b().case(cond, dispatch_items, Some(dispatch_default));
        self.append(begin, dispatch);

        for end in ends {
            self.transition(end, join);
        }
        Ok(())
    }

    /// Request state, tag state, then one state per word of the destination.
    fn lower_get(
        &mut self,
        task: TaskIdx,
        fd: ExprIdx,
        var: Option<VarIdx>,
    ) -> SluiceResult<()> {
        let t = task.raw() as u64;
        let words = var.map_or(0, |v| words_for(self.module.vars[v].width));

        let request = self.current();
        let s = self.set(Signal::FreadReq, t);
        self.append(request, s);
        let s = self.set(Signal::Paused, 1);
        self.append(request, s);
        self.transition(request, request + 1);

        let tag_state = self.next_state();
        let exit = tag_state + 1 + words;
        let data = self.read(Signal::FreadData);
        let mut b = self.b();
        let tag = b.slice(data, 15, 0);
        let eof = b.slice(data, 16, 16);
        let expected = b.constant(t, 16);
        let matched = b.binary(BinOp::Eq, tag, expected);
        let mut then = vec![b.assign(Lvalue::Feof(fd), eof)];
        if words > 0 {
            then.push(self.set(Signal::FreadReq, t));
            then.push(self.set(Signal::Paused, 1));
        } else {
            then.push(self.set(Signal::FreadReq, 0));
        }
        then.push(self.set(Signal::State, (tag_state + 1) as u64));
        // the host serves the read as an ordinary task and writes the
        // destination itself, so the data states are skipped
        let els = vec![
            self.set(Signal::FreadReq, 0),
            self.set(Signal::Paused, 1),
            self.set(Signal::TaskId, t),
            self.set(Signal::State, exit as u64),
        ];
        let mut b = self.b();
        let then = b.seq(then);
        let els = b.seq(els);
        let branch = b.branch(matched, then, Some(els));
        self.append(tag_state, branch);
        self.task_states.push((tag_state, task));

        for word in 0..words {
            let state = self.next_state();
            if let Some(var) = var {
                let data = self.read(Signal::FreadData);
                let store = self.b().assign(Lvalue::Word { var, word }, data);
                self.append(state, store);
            }
            if word + 1 < words {
                let s = self.set(Signal::FreadReq, t);
                self.append(state, s);
                let s = self.set(Signal::Paused, 1);
                self.append(state, s);
            } else {
                let s = self.set(Signal::FreadReq, 0);
                self.append(state, s);
            }
            self.transition(state, state + 1);
        }
        self.next_state();
        debug_assert_eq!(self.current(), exit);
        Ok(())
    }

    /// One framing word carrying the task id, then one state per 64-bit word
    /// of the value.
    fn lower_put(&mut self, task: TaskIdx, expr: ExprIdx) -> SluiceResult<()> {
        let t = task.raw() as u64;
        let words = words_for(self.module.width_of(expr));
        let source = match self.module.exprs[expr] {
            Expr::Var(var) => Some(var),
            _ => None,
        };
        for i in 0..=words {
            let state = self.current();
            let data = match (i, source) {
                (0, _) => self.b().constant(t, 64),
                (i, Some(var)) => self.b().word(var, i - 1),
                (1, None) => expr,
                // expressions other than variables are 64 bits at most
                (_, None) => self.b().constant(0, 64),
            };
            let s = self.set(Signal::FwriteReq, 1);
            self.append(state, s);
            let s = self.set(Signal::Paused, 1);
            self.append(state, s);
            let s = self.set_expr(Signal::FwriteData, data);
            self.append(state, s);
            if i == 0 {
                self.task_states.push((state, task));
            }
            self.transition(state, state + 1);
            self.next_state();
        }
        let s = self.set(Signal::FwriteReq, 0);
        self.append_current(s);
        Ok(())
    }

    fn finish(
        mut self,
        events: Vec<Event>,
        final_state: u32,
    ) -> SluiceResult<Machine> {
        let lists = std::mem::take(&mut self.states);
        let mut body = vec![];

        let trigger = self.read(Signal::Trigger);
        let current = self.read(Signal::State);
        let zero = self.b().constant(0, 32);
        let restart = self.b().cond(trigger, zero, current);
        body.push(self.set_expr(Signal::State, restart));

        let mut states = vec![];
        for (number, stmts) in lists.into_iter().enumerate() {
            let current = self.read(Signal::State);
            let paused = self.read(Signal::Paused);
            let mut b = self.b();
            let number = b.constant(number as u64, 32);
            let here = b.binary(BinOp::Eq, current, number);
            let running = b.unary(UnOp::Not, paused);
            let guard = b.binary(BinOp::And, here, running);
            let stmts = b.seq(stmts);
            let state = b.branch(guard, stmts, None);
            states.push(state);
            body.push(state);
        }

        let reset = self.read(Signal::Reset);
        let resume = self.read(Signal::Continue);
        let paused = self.read(Signal::Paused);
        let task_id = self.read(Signal::TaskId);
        let current = self.read(Signal::State);
        let mut b = self.b();
        let one = b.constant(1, 1);
        let zero = b.constant(0, 1);
        let kept = b.cond(resume, zero, paused);
        let next_paused = b.cond(reset, one, kept);
        let unresolved = b.constant(UNRESOLVED_TASK as u64, 16);
        let cleared = b.constant(0, 16);
        let kept = b.cond(resume, cleared, task_id);
        let next_task = b.cond(reset, unresolved, kept);
        let done = b.constant(final_state as u64, 32);
        let next_state = b.cond(reset, done, current);
        body.push(self.set_expr(Signal::Paused, next_paused));
        body.push(self.set_expr(Signal::TaskId, next_task));
        body.push(self.set_expr(Signal::State, next_state));

        let body = self.b().seq(body);
        let machine = Machine {
            block: self.block,
            events,
            states,
            final_state,
            task_states: self.task_states,
            body,
        };
        machine.validate(self.module)?;
        Ok(machine)
    }
}
