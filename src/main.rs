//! Sluice: a server that compiles hardware modules and runs them on behalf
//! of remote clients.
use argh::FromArgs;
use sluice_engine::logging::{self, info};
use sluice_remote::{RemoteResult, Server, ServerConfig};
use std::path::PathBuf;

#[derive(FromArgs)]
#[argh(help_triggers("-h", "--help"))]
/// The Sluice runtime server
struct Opts {
    /// configuration file (TOML). Settings can also be given as
    /// `SLUICE_`-prefixed environment variables
    #[argh(option, short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// TCP port to listen on
    #[argh(option, short = 'p')]
    port: Option<u16>,

    /// also listen on this filesystem path
    #[argh(option)]
    path: Option<PathBuf>,

    /// threads running compiles and open-loop runs
    #[argh(option, short = 'j')]
    workers: Option<usize>,

    /// silence warnings
    #[argh(switch, short = 'q', long = "quiet")]
    quiet: bool,

    /// enables debug logging
    #[argh(switch, long = "debug-logging")]
    debug_logging: bool,

    /// print the effective configuration as JSON and exit
    #[argh(switch, long = "dump-config")]
    dump_config: bool,
}

fn main() -> RemoteResult<()> {
    let opts: Opts = argh::from_env();

    let mut config = ServerConfig::load(opts.config.as_deref())?;
    if let Some(port) = opts.port {
        config.port = port;
    }
    if let Some(path) = opts.path {
        config.path = Some(path);
    }
    if let Some(workers) = opts.workers {
        config.workers = workers;
    }
    config.runtime.quiet |= opts.quiet;
    config.runtime.debug_logging |= opts.debug_logging;

    if opts.dump_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let logger =
        logging::initialize_logger(config.runtime.get_logging_config());
    let compiler = config.compiler()?;
    info!(logger, "back ends: {}", compiler.names().join(", "));
    Server::bind(&config, compiler, logger)?.run()
}
