//! The device back end: an external toolchain builds the lowered module into
//! an app, which is programmed onto a device behind a daemon.
use super::{Backend, CancelToken, CompileJob};
use crate::engine::Engine;
use crate::errors::{RuntimeError, RuntimeResult};
use crate::logging::{self, Logger};
use crate::logic::LogicEngine;
use crate::program::Program;
use crate::substrate::DaemonSubstrate;
use crate::system;
use crate::var_table::VarTable;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Reads the lowered module as JSON on stdin and prints the app id.
    pub toolchain: Vec<String>,
    /// Loads an app onto the device. `{app}` and `{slot}` are substituted.
    pub reprogram: Vec<String>,
    pub socket: PathBuf,
    /// Run once if the daemon socket cannot be reached.
    pub start: Option<Vec<String>>,
    pub slot: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            toolchain: vec![],
            reprogram: vec![],
            socket: PathBuf::from("/tmp/sluice_daemon"),
            start: None,
            slot: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DaemonBackend {
    config: DaemonConfig,
}

impl DaemonBackend {
    pub fn new(config: DaemonConfig) -> Self {
        Self { config }
    }

    fn substitute(&self, command: &[String], app: u64) -> Vec<String> {
        command
            .iter()
            .map(|arg| {
                arg.replace("{app}", &app.to_string())
                    .replace("{slot}", &self.config.slot.to_string())
            })
            .collect()
    }

    fn connect(
        &self,
        app: u64,
        cancel: &CancelToken,
        logger: &Logger,
    ) -> RuntimeResult<DaemonSubstrate> {
        let config = &self.config;
        match DaemonSubstrate::connect(&config.socket, config.slot, app) {
            Ok(substrate) => Ok(substrate),
            Err(err) => {
                let Some(start) = &config.start else {
                    return Err(err);
                };
                logging::warn!(
                    logger,
                    "daemon at {} is not reachable ({}), starting it",
                    config.socket.display(),
                    err
                );
                system::execute(start, b"", cancel)?;
                DaemonSubstrate::connect(&config.socket, config.slot, app)
            }
        }
    }
}

impl Backend for DaemonBackend {
    fn name(&self) -> &'static str {
        "daemon"
    }

    fn compile(&self, job: CompileJob) -> RuntimeResult<Box<dyn Engine>> {
        let CompileJob {
            module,
            host,
            config,
            cancel,
            interrupts,
            logger,
        } = job;
        if self.config.toolchain.is_empty() {
            return Err(RuntimeError::Unsupported(
                "the daemon back end has no toolchain configured".to_string(),
            )
            .into());
        }
        let program = Arc::new(Program::lower(module, &config, &logger)?);
        let json = sluice_ir::parser::to_json(&program.module)?;
        let out = system::execute(&self.config.toolchain, &json, &cancel)?;
        let app = out
            .trim()
            .parse::<u64>()
            .map_err(|_| RuntimeError::Toolchain(out.trim().to_string()))?;
        logging::info!(logger, "built `{}'", program.module.name; "app" => app);

        if !self.config.reprogram.is_empty() {
            let reprogram = self.substitute(&self.config.reprogram, app);
            interrupts.state_safe(&mut || {
                system::execute(&reprogram, b"", &cancel).map(|_| ())
            })?;
        }
        cancel.check()?;

        let substrate = self.connect(app, &cancel, &logger)?;
        let table = VarTable::new(program.layout.clone(), substrate);
        Ok(Box::new(LogicEngine::new(program, table, host, logger)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Immediate, InterruptScheduler};
    use crate::configuration::RuntimeConfig;
    use crate::interface::{Host, LocalInterface};
    use sluice_ir::{Builder, Event, Module};
    use std::io::{Read, Write};
    use std::os::unix::net::UnixListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn module() -> Module {
        let mut m = Module::new("top");
        let mut b = Builder::new(&mut m);
        let clk = b.input("clk", 1);
        let x = b.reg("x", 8);
        let one = b.constant(1, 8);
        let set = b.assign(x, one);
        let body = b.seq(vec![set]);
        b.always(vec![Event::posedge(clk)], body);
        m
    }

    fn job(interrupts: Arc<dyn InterruptScheduler>) -> CompileJob {
        CompileJob {
            module: module(),
            host: Host::shared(LocalInterface::new()),
            config: RuntimeConfig::default(),
            cancel: CancelToken::new(),
            interrupts,
            logger: logging::discard(),
        }
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl InterruptScheduler for Counting {
        fn state_safe(
            &self,
            op: &mut dyn FnMut() -> RuntimeResult<()>,
        ) -> RuntimeResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            op()
        }
    }

    /// Answers every read with zero until the client hangs up.
    fn idle_daemon(listener: UnixListener) -> thread::JoinHandle<usize> {
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut packet = [0u8; 40];
            let mut packets = 0;
            while stream.read_exact(&mut packet).is_ok() {
                packets += 1;
                if packet[0] == 1 {
                    stream.write_all(&[0u8; 16]).unwrap();
                }
            }
            packets
        })
    }

    #[test]
    fn builds_programs_and_connects() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("daemon.sock");
        let marker = dir.path().join("programmed");
        let daemon = idle_daemon(UnixListener::bind(&socket).unwrap());

        let backend = DaemonBackend::new(DaemonConfig {
            toolchain: sh("cat > /dev/null; echo 12"),
            reprogram: sh(&format!(
                "echo {{app}}:{{slot}} > {}",
                marker.display()
            )),
            socket,
            start: None,
            slot: 2,
        });
        let interrupts = Arc::new(Counting::default());
        let mut engine = backend.compile(job(interrupts.clone())).unwrap();
        assert_eq!(interrupts.0.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "12:2");

        engine.evaluate().unwrap();
        drop(engine);
        assert!(daemon.join().unwrap() > 0);
    }

    #[test]
    fn toolchain_output_must_be_an_app_id() {
        let backend = DaemonBackend::new(DaemonConfig {
            toolchain: sh("cat > /dev/null; echo done"),
            ..Default::default()
        });
        let err = backend.compile(job(Arc::new(Immediate))).err().unwrap();
        assert!(matches!(&*err, RuntimeError::Toolchain(out) if out == "done"));
    }

    #[test]
    fn unreachable_daemons_are_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DaemonBackend::new(DaemonConfig {
            toolchain: sh("cat > /dev/null; echo 1"),
            socket: dir.path().join("missing.sock"),
            ..Default::default()
        });
        let err = backend.compile(job(Arc::new(Immediate))).err().unwrap();
        assert!(matches!(&*err, RuntimeError::Io(_)));
    }
}
