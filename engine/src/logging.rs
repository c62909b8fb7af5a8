use crate::configuration::LoggingConfig;

// re-export for convenience
pub use slog::Logger;
pub use slog::{debug, error, info, o, trace, warn};
use slog::{Drain, Level};

/// Builds the root logger. Records go to stderr through an asynchronous
/// drain, so log calls never block engine execution.
pub fn initialize_logger(conf: LoggingConfig) -> Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build();
    let filter_level = if conf.debug_logging {
        Level::Trace
    } else if conf.quiet {
        Level::Error
    } else {
        Level::Info
    };
    let drain = drain.filter_level(filter_level).fuse();

    let drain = slog_async::Async::new(drain).build().fuse();

    Logger::root(drain, o!())
}

/// A logger that drops every record.
pub fn discard() -> Logger {
    Logger::root(slog::Discard, o!())
}
