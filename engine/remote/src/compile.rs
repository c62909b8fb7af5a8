//! Compile requests: parse, build with the named back end, and register the
//! engine under the requesting client.
use crate::engine_table::EngineTable;
use crate::errors::RemoteResult;
use parking_lot::Mutex;
use slog::{debug, info, o, Logger};
use sluice_engine::backend::{
    CancelToken, CompileJob, Compiler, InterruptScheduler,
};
use sluice_engine::configuration::RuntimeConfig;
use sluice_engine::{Host, Interface, RuntimeError};
use sluice_ir::parser::{JsonParser, Parser};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

type InFlight = HashMap<(u32, u32), Vec<(u64, CancelToken)>>;

/// Runs compilations and keeps track of the ones still running so that a
/// client can stop them.
pub struct CompilePipeline {
    compiler: Compiler,
    parser: Box<dyn Parser>,
    config: RuntimeConfig,
    engines: Arc<Mutex<EngineTable>>,
    interrupts: Arc<dyn InterruptScheduler>,
    in_flight: Mutex<InFlight>,
    tickets: AtomicU64,
    logger: Logger,
}

impl CompilePipeline {
    pub fn new(
        compiler: Compiler,
        config: RuntimeConfig,
        engines: Arc<Mutex<EngineTable>>,
        interrupts: Arc<dyn InterruptScheduler>,
        logger: Logger,
    ) -> Self {
        Self {
            compiler,
            parser: Box::new(JsonParser),
            config,
            engines,
            interrupts,
            in_flight: Mutex::new(HashMap::new()),
            tickets: AtomicU64::new(0),
            logger,
        }
    }

    /// Builds an engine for `(client, engine)` and returns its instance
    /// index. The engine reports back through `interface`.
    pub fn compile(
        &self,
        client: u32,
        engine: u32,
        backend: &str,
        source: &[u8],
        interface: Box<dyn Interface>,
    ) -> RemoteResult<u32> {
        let key = (client, engine);
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        let cancel = CancelToken::new();
        self.in_flight
            .lock()
            .entry(key)
            .or_default()
            .push((ticket, cancel.clone()));

        let logger =
            self.logger.new(o!("client" => client, "engine" => engine));
        debug!(logger, "compiling"; "backend" => backend);
        let built = self
            .parser
            .parse(source)
            .map_err(RuntimeError::from)
            .map_err(Into::into)
            .and_then(|module| {
                self.compiler.compile(
                    backend,
                    CompileJob {
                        module,
                        host: Arc::new(Mutex::new(Host::new(interface))),
                        config: self.config,
                        cancel,
                        interrupts: Arc::clone(&self.interrupts),
                        logger: logger.clone(),
                    },
                )
            });

        let mut in_flight = self.in_flight.lock();
        if let Some(tokens) = in_flight.get_mut(&key) {
            tokens.retain(|(t, _)| *t != ticket);
            if tokens.is_empty() {
                in_flight.remove(&key);
            }
        }
        drop(in_flight);

        let instance = self.engines.lock().push(client, engine, built?);
        info!(logger, "engine ready"; "instance" => instance);
        Ok(instance)
    }

    /// Cancels every running compile of `(client, engine)`. Returns how many
    /// were running.
    pub fn stop(&self, client: u32, engine: u32) -> usize {
        let in_flight = self.in_flight.lock();
        let tokens = in_flight
            .get(&(client, engine))
            .map_or(&[][..], Vec::as_slice);
        for (_, token) in tokens {
            token.cancel();
        }
        tokens.len()
    }
}
