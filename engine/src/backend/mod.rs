//! Back ends turn a module into a running [Engine].
//!
//! Every back end implements [Backend] and is registered by name with a
//! [Compiler]. A compile request names the back end it wants; unknown names
//! are an error rather than a fallback.
mod daemon;
pub mod sim;

pub use daemon::{DaemonBackend, DaemonConfig};
pub use sim::SimBackend;

use crate::configuration::RuntimeConfig;
use crate::engine::Engine;
use crate::errors::{RuntimeError, RuntimeResult};
use crate::interface::SharedHost;
use crate::logging::Logger;
use itertools::Itertools;
use sluice_ir::Module;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Set by whoever wants a compilation to stop early. Back ends check it
/// between stages and while waiting on external programs.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fails with [RuntimeError::Cancelled] once the token is set.
    pub fn check(&self) -> RuntimeResult<()> {
        if self.is_cancelled() {
            Err(RuntimeError::Cancelled.into())
        } else {
            Ok(())
        }
    }
}

/// Runs operations that must not overlap any engine step, such as
/// reprogramming a device other engines are running on.
pub trait InterruptScheduler: Send + Sync {
    fn state_safe(
        &self,
        op: &mut dyn FnMut() -> RuntimeResult<()>,
    ) -> RuntimeResult<()>;
}

/// Runs the operation on the spot. For processes that host no other engines.
#[derive(Debug, Default, Clone, Copy)]
pub struct Immediate;

impl InterruptScheduler for Immediate {
    fn state_safe(
        &self,
        op: &mut dyn FnMut() -> RuntimeResult<()>,
    ) -> RuntimeResult<()> {
        op()
    }
}

/// Everything a back end needs to build one engine.
pub struct CompileJob {
    pub module: Module,
    pub host: SharedHost,
    pub config: RuntimeConfig,
    pub cancel: CancelToken,
    pub interrupts: Arc<dyn InterruptScheduler>,
    pub logger: Logger,
}

/// All back ends must implement this trait.
/// `Backend::name` is the name compile requests use to select it.
/// `Backend::compile` lowers the module and starts an engine for it.
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;
    fn compile(&self, job: CompileJob) -> RuntimeResult<Box<dyn Engine>>;
}

/// The back ends of a process, by name.
#[derive(Default, Clone)]
pub struct Compiler {
    backends: HashMap<&'static str, Arc<dyn Backend>>,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a back end, replacing any earlier one of the same name.
    pub fn register<B: Backend + 'static>(&mut self, backend: B) {
        self.backends.insert(backend.name(), Arc::new(backend));
    }

    pub fn get(&self, name: &str) -> RuntimeResult<Arc<dyn Backend>> {
        self.backends.get(name).cloned().ok_or_else(|| {
            RuntimeError::UnknownBackend {
                name: name.to_string(),
                valid: self.names().join(", "),
            }
            .into()
        })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.backends.keys().copied().sorted().collect()
    }

    pub fn compile(
        &self,
        name: &str,
        job: CompileJob,
    ) -> RuntimeResult<Box<dyn Engine>> {
        job.cancel.check()?;
        self.get(name)?.compile(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{Host, LocalInterface};
    use crate::logging;

    fn job(module: Module) -> CompileJob {
        CompileJob {
            module,
            host: Host::shared(LocalInterface::new()),
            config: RuntimeConfig::default(),
            cancel: CancelToken::new(),
            interrupts: Arc::new(Immediate),
            logger: logging::discard(),
        }
    }

    #[test]
    fn unknown_backends_are_listed_in_the_error() {
        let mut compiler = Compiler::new();
        compiler.register(SimBackend);
        let err = compiler
            .compile("fpga", job(Module::new("m")))
            .err()
            .unwrap();
        assert!(matches!(
            &*err,
            RuntimeError::UnknownBackend { valid, .. } if valid == "sim"
        ));
    }

    #[test]
    fn cancelled_jobs_do_not_start() {
        let mut compiler = Compiler::new();
        compiler.register(SimBackend);
        let job = job(Module::new("m"));
        job.cancel.cancel();
        let err = compiler.compile("sim", job).err().unwrap();
        assert!(matches!(&*err, RuntimeError::Cancelled));
    }

    #[test]
    fn sim_is_registered_by_name() {
        let mut compiler = Compiler::new();
        compiler.register(SimBackend);
        assert_eq!(compiler.names(), vec!["sim"]);
        assert!(compiler.compile("sim", job(Module::new("m"))).is_ok());
    }
}
