//! A back end that compiles on another server and drives the engine there.
use crate::client::Connection;
use crate::errors::RemoteError;
use crate::socket::Endpoint;
use baa::BitVecValue;
use parking_lot::Mutex;
use slog::{debug, info};
use sluice_engine::backend::{Backend, CompileJob};
use sluice_engine::interface::FId;
use sluice_engine::{
    Engine, Interface, RuntimeError, RuntimeResult, SharedHost, VId,
};
use sluice_ir::Whence;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Forwards compiles to the server at `endpoint`, asking it for `backend`.
/// The connection is opened by the first compile and shared by every engine
/// after it.
pub struct ProxyBackend {
    endpoint: Endpoint,
    backend: String,
    max_message_bytes: usize,
    connection: Mutex<Option<Connection>>,
    next_engine: AtomicU32,
}

impl ProxyBackend {
    pub fn new(
        endpoint: Endpoint,
        backend: String,
        max_message_bytes: usize,
    ) -> Self {
        Self {
            endpoint,
            backend,
            max_message_bytes,
            connection: Mutex::new(None),
            next_engine: AtomicU32::new(0),
        }
    }

    fn connection(&self) -> Result<Connection, RemoteError> {
        let mut connection = self.connection.lock();
        if let Some(c) = connection.as_ref() {
            return Ok(c.clone());
        }
        let c = Connection::connect(&self.endpoint, self.max_message_bytes)?;
        *connection = Some(c.clone());
        Ok(c)
    }
}

fn remote(err: RemoteError) -> RuntimeError {
    match err {
        RemoteError::Io(err) => RuntimeError::Io(err),
        other => RuntimeError::Remote(other.to_string()),
    }
}

impl Backend for ProxyBackend {
    fn name(&self) -> &'static str {
        "proxy"
    }

    fn compile(&self, job: CompileJob) -> RuntimeResult<Box<dyn Engine>> {
        let connection = self.connection().map_err(remote)?;
        let engine = self.next_engine.fetch_add(1, Ordering::Relaxed);
        debug!(
            job.logger,
            "forwarding compile";
            "endpoint" => %self.endpoint,
            "engine" => engine
        );

        let done = AtomicBool::new(false);
        let compiled = thread::scope(|s| {
            s.spawn(|| {
                while !done.load(Ordering::SeqCst) {
                    if job.cancel.is_cancelled() {
                        let _ = connection.stop_compile(engine);
                        return;
                    }
                    thread::sleep(CANCEL_POLL);
                }
            });
            let compiled = connection.compile(
                engine,
                &self.backend,
                &job.module,
                Box::new(HostInterface(job.host.clone())),
            );
            done.store(true, Ordering::SeqCst);
            compiled
        });
        job.cancel.check()?;
        let compiled = compiled.map_err(remote)?;
        info!(
            job.logger,
            "compiled `{}' remotely", job.module.name;
            "endpoint" => %self.endpoint
        );
        Ok(Box::new(compiled))
    }
}

/// Hands a remote engine's callbacks to the host of the local one.
struct HostInterface(SharedHost);

impl Interface for HostInterface {
    fn write(&mut self, id: VId, bits: &BitVecValue) {
        self.0.lock().interface().write(id, bits)
    }

    fn debug(&mut self, action: u32, text: &str) {
        self.0.lock().interface().debug(action, text)
    }

    fn finish(&mut self, arg: u32) {
        self.0.lock().interface().finish(arg)
    }

    fn restart(&mut self, path: &str) {
        self.0.lock().interface().restart(path)
    }

    fn retarget(&mut self, target: &str) {
        self.0.lock().interface().retarget(target)
    }

    fn save(&mut self, path: &str) {
        self.0.lock().interface().save(path)
    }

    fn yield_now(&mut self) {
        self.0.lock().interface().yield_now()
    }

    fn fopen(&mut self, path: &str) -> io::Result<FId> {
        self.0.lock().interface().fopen(path)
    }

    fn get(&mut self, fd: FId, max: usize) -> io::Result<Vec<u8>> {
        self.0.lock().interface().get(fd, max)
    }

    fn put(&mut self, fd: FId, bytes: &[u8]) -> io::Result<()> {
        self.0.lock().interface().put(fd, bytes)
    }

    fn seek(&mut self, fd: FId, offset: u64, whence: Whence) -> io::Result<()> {
        self.0.lock().interface().seek(fd, offset, whence)
    }

    fn flush(&mut self, fd: FId) -> io::Result<()> {
        self.0.lock().interface().flush(fd)
    }

    fn eof(&mut self, fd: FId) -> io::Result<bool> {
        self.0.lock().interface().eof(fd)
    }

    fn clear(&mut self, fd: FId) -> io::Result<()> {
        self.0.lock().interface().clear(fd)
    }
}
