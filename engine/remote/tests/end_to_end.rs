use baa::{BitVecOps, BitVecValue};
use sluice_engine::backend::{Backend, CompileJob, Compiler, SimBackend};
use sluice_engine::interface::{HostEvent, LocalInterface};
use sluice_engine::{Engine, Input, RuntimeResult, State, VId};
use sluice_idx::IndexRef;
use sluice_ir::{BinOp, Builder, Event, Module, Radix, StmtIdx, Task, VarIdx};
use sluice_remote::config::ProxyConfig;
use sluice_remote::{
    Connection, Endpoint, RemoteError, RemoteResult, Server, ServerConfig,
    ServerHandle,
};
use slog::Logger;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

const MAX: usize = 1 << 20;

struct Running {
    endpoint: Endpoint,
    handle: ServerHandle,
    thread: thread::JoinHandle<RemoteResult<()>>,
}

impl Running {
    fn stop(self) {
        self.handle.stop();
        self.thread.join().unwrap().unwrap();
    }
}

fn config() -> ServerConfig {
    ServerConfig {
        port: 0,
        path: None,
        workers: 2,
        ..Default::default()
    }
}

fn serve(config: &ServerConfig, compiler: Compiler) -> Running {
    let logger = Logger::root(slog::Discard, slog::o!());
    let server = Server::bind(config, compiler, logger).unwrap();
    let endpoint = server.endpoints().unwrap().remove(0);
    let handle = server.handle();
    let thread = thread::spawn(move || server.run());
    Running {
        endpoint,
        handle,
        thread,
    }
}

fn sim() -> Compiler {
    let mut compiler = Compiler::new();
    compiler.register(SimBackend);
    compiler
}

/// `clk` and an 8-bit register, with `body` run on every rising edge.
fn clocked(
    body: impl FnOnce(&mut Builder, VarIdx) -> Vec<StmtIdx>,
) -> (Module, VId, VarIdx) {
    let mut m = Module::new("top");
    let mut b = Builder::new(&mut m);
    let clk = b.input("clk", 1);
    let x = b.reg("x", 8);
    let stmts = body(&mut b, x);
    let body = b.seq(stmts);
    b.always(vec![Event::posedge(clk)], body);
    (m, clk.index() as VId, x)
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

fn tick(engine: &mut dyn Engine, clk: VId) {
    for level in [1, 0] {
        engine.read(clk, &BitVecValue::from_u64(level, 1)).unwrap();
        engine.evaluate().unwrap();
    }
}

fn value_of(engine: &mut dyn Engine, x: VarIdx) -> Option<u64> {
    engine.get_state().unwrap()[&(x.index() as VId)].to_u64()
}

fn streams_in_order(endpoint: &Endpoint, backend: &str) {
    let (m, clk, x) =
        clocked(|b, x| vec![put(b, 7, x), get(b, 8, x), put(b, 7, x)]);
    let local = LocalInterface::new().with_stream(8, b"42");
    let connection = Connection::connect(endpoint, MAX).unwrap();
    let mut engine = connection
        .compile(0, backend, &m, Box::new(local.clone()))
        .unwrap();
    engine.finalize().unwrap();
    tick(&mut engine, clk);
    assert_eq!(local.contents(7), b"042");
    assert_eq!(value_of(&mut engine, x), Some(42));
    assert!(!engine.there_were_tasks().unwrap());
}

#[test]
fn stream_tasks_run_in_program_order() {
    let server = serve(&config(), sim());
    streams_in_order(&server.endpoint, "sim");
    server.stop();
}

#[test]
fn caller_visible_tasks_reach_the_client() {
    let server = serve(&config(), sim());
    let (m, clk, x) = clocked(|b, x| {
        let save = b.task(Task::Save {
            path: "snap.json".to_string(),
        });
        vec![save, increment(b, x)]
    });
    let local = LocalInterface::new();
    let connection = Connection::connect(&server.endpoint, MAX).unwrap();
    let mut engine = connection
        .compile(0, "sim", &m, Box::new(local.clone()))
        .unwrap();
    engine.finalize().unwrap();
    engine.read(clk, &BitVecValue::from_u64(1, 1)).unwrap();
    engine.evaluate().unwrap();
    assert!(engine.there_were_tasks().unwrap());
    assert_eq!(local.events(), vec![HostEvent::Save("snap.json".into())]);
    assert_eq!(value_of(&mut engine, x), Some(1));
    drop(engine);
    drop(connection);
    server.stop();
}

#[test]
fn open_loop_runs_off_the_dispatch_thread() {
    let server = serve(&config(), sim());
    let (m, clk, x) = clocked(|b, x| vec![increment(b, x)]);
    let connection = Connection::connect(&server.endpoint, MAX).unwrap();
    let mut engine = connection
        .compile(0, "sim", &m, Box::new(LocalInterface::new()))
        .unwrap();
    engine.finalize().unwrap();
    assert_eq!(engine.open_loop(clk, false, 5).unwrap(), 5);
    assert_eq!(value_of(&mut engine, x), Some(5));
    tick(&mut engine, clk);
    assert_eq!(value_of(&mut engine, x), Some(6));
    drop(engine);
    server.stop();
}

#[test]
fn snapshots_survive_the_wire() {
    let server = serve(&config(), sim());
    let (m, clk, x) = clocked(|b, x| vec![increment(b, x)]);
    let connection = Connection::connect(&server.endpoint, MAX).unwrap();
    let mut engine = connection
        .compile(0, "sim", &m, Box::new(LocalInterface::new()))
        .unwrap();
    engine.finalize().unwrap();
    let mut state = State::new();
    state.insert(x.index() as VId, BitVecValue::from_u64(9, 8));
    engine.set_state(&state).unwrap();
    tick(&mut engine, clk);
    assert_eq!(value_of(&mut engine, x), Some(10));
    let input = engine.get_input().unwrap();
    assert_eq!(input.keys().copied().collect::<Vec<_>>(), vec![clk]);
    drop(engine);
    server.stop();
}

#[test]
fn unknown_backends_are_refused() {
    let server = serve(&config(), sim());
    let (m, _, _) = clocked(|b, x| vec![increment(b, x)]);
    let connection = Connection::connect(&server.endpoint, MAX).unwrap();
    let err = connection
        .compile(0, "verilator", &m, Box::new(LocalInterface::new()))
        .err()
        .unwrap();
    assert!(
        matches!(
            &err,
            RemoteError::Refused(reason)
                if reason.contains("not a valid backend")
        ),
        "{err}"
    );
    drop(connection);
    server.stop();
}

#[test]
fn engines_of_different_clients_are_independent() {
    let server = serve(&config(), sim());
    let (m, clk, x) = clocked(|b, x| vec![increment(b, x)]);
    let first = Connection::connect(&server.endpoint, MAX).unwrap();
    let second = Connection::connect(&server.endpoint, MAX).unwrap();
    assert_ne!(first.id(), second.id());
    let mut a = first
        .compile(0, "sim", &m, Box::new(LocalInterface::new()))
        .unwrap();
    let mut b = second
        .compile(0, "sim", &m, Box::new(LocalInterface::new()))
        .unwrap();
    a.finalize().unwrap();
    b.finalize().unwrap();
    tick(&mut a, clk);
    tick(&mut a, clk);
    tick(&mut b, clk);
    assert_eq!(value_of(&mut a, x), Some(2));
    assert_eq!(value_of(&mut b, x), Some(1));
    drop((a, b, first, second));
    server.stop();
}

#[test]
fn closing_a_connection_tears_down_its_engines() {
    let server = serve(&config(), sim());
    let (m, clk, x) = clocked(|b, x| vec![increment(b, x)]);
    let connection = Connection::connect(&server.endpoint, MAX).unwrap();
    let mut first = connection
        .compile(0, "sim", &m, Box::new(LocalInterface::new()))
        .unwrap();
    let second = connection
        .compile(0, "sim", &m, Box::new(LocalInterface::new()))
        .unwrap();
    second.teardown().unwrap();
    first.finalize().unwrap();
    tick(&mut first, clk);
    assert_eq!(value_of(&mut first, x), Some(1));

    connection.close();
    assert!(first.evaluate().is_err());
    drop(first);
    server.stop();
}

#[test]
fn proxies_chain_servers() {
    let upstream = serve(&config(), sim());
    let mut downstream_config = config();
    downstream_config.proxy = Some(ProxyConfig {
        endpoint: upstream.endpoint.to_string(),
        backend: "sim".to_string(),
    });
    let downstream =
        serve(&downstream_config, downstream_config.compiler().unwrap());
    streams_in_order(&downstream.endpoint, "proxy");
    downstream.stop();
    upstream.stop();
}

static IN_BARRIER: AtomicBool = AtomicBool::new(false);
static OVERLAPS: AtomicUsize = AtomicUsize::new(0);
static BARRIERS: AtomicUsize = AtomicUsize::new(0);

/// Counts evaluations that land inside a state-safe interrupt.
struct Probe;

impl Engine for Probe {
    fn get_state(&mut self) -> RuntimeResult<State> {
        Ok(State::new())
    }

    fn set_state(&mut self, _: &State) -> RuntimeResult<()> {
        Ok(())
    }

    fn get_input(&mut self) -> RuntimeResult<Input> {
        Ok(Input::new())
    }

    fn set_input(&mut self, _: &Input) -> RuntimeResult<()> {
        Ok(())
    }

    fn finalize(&mut self) -> RuntimeResult<()> {
        Ok(())
    }

    fn read(&mut self, _: VId, _: &BitVecValue) -> RuntimeResult<()> {
        Ok(())
    }

    fn evaluate(&mut self) -> RuntimeResult<()> {
        if IN_BARRIER.load(Ordering::SeqCst) {
            OVERLAPS.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn there_are_updates(&mut self) -> RuntimeResult<bool> {
        Ok(false)
    }

    fn update(&mut self) -> RuntimeResult<()> {
        Ok(())
    }

    fn there_were_tasks(&mut self) -> RuntimeResult<bool> {
        Ok(false)
    }

    fn open_loop(&mut self, _: VId, _: bool, _: u32) -> RuntimeResult<u32> {
        Ok(0)
    }
}

struct ProbeBackend;

impl Backend for ProbeBackend {
    fn name(&self) -> &'static str {
        "probe"
    }

    fn compile(&self, _: CompileJob) -> RuntimeResult<Box<dyn Engine>> {
        Ok(Box::new(Probe))
    }
}

/// Holds a state-safe interrupt open for a while during its compile.
struct Disruptive;

impl Backend for Disruptive {
    fn name(&self) -> &'static str {
        "disruptive"
    }

    fn compile(&self, job: CompileJob) -> RuntimeResult<Box<dyn Engine>> {
        job.interrupts.state_safe(&mut || {
            IN_BARRIER.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(100));
            IN_BARRIER.store(false, Ordering::SeqCst);
            BARRIERS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })?;
        Ok(Box::new(Probe))
    }
}

#[test]
fn engine_calls_wait_out_state_safe_interrupts() {
    let mut compiler = sim();
    compiler.register(ProbeBackend);
    compiler.register(Disruptive);
    let server = serve(&config(), compiler);
    let (m, _, _) = clocked(|b, x| vec![increment(b, x)]);

    let busy = Connection::connect(&server.endpoint, MAX).unwrap();
    let mut probe = busy
        .compile(0, "probe", &m, Box::new(LocalInterface::new()))
        .unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let calls = Arc::new(AtomicUsize::new(0));
    let driver = {
        let stop = Arc::clone(&stop);
        let calls = Arc::clone(&calls);
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                probe.evaluate().unwrap();
                calls.fetch_add(1, Ordering::SeqCst);
            }
        })
    };
    while calls.load(Ordering::SeqCst) == 0 {
        thread::yield_now();
    }

    let other = Connection::connect(&server.endpoint, MAX).unwrap();
    let disruptive = other
        .compile(0, "disruptive", &m, Box::new(LocalInterface::new()))
        .unwrap();
    let before = calls.load(Ordering::SeqCst);
    while calls.load(Ordering::SeqCst) == before {
        thread::yield_now();
    }
    stop.store(true, Ordering::SeqCst);
    driver.join().unwrap();

    assert_eq!(BARRIERS.load(Ordering::SeqCst), 1);
    assert_eq!(OVERLAPS.load(Ordering::SeqCst), 0);
    drop((disruptive, other, busy));
    server.stop();
}
