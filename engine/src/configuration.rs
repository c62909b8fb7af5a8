use bon::Builder;
use serde::{Deserialize, Serialize};
use sluice_opt::IoMode;

/// Default bound on the cycles a simulated substrate runs for one read of the
/// wait register.
pub const DEFAULT_MAX_CYCLES: u32 = 1024;

/// Configuration struct containing options affecting compilation and
/// execution of engines.
#[derive(Debug, Clone, Copy, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// how `get` and `put` tasks reach the caller
    #[builder(default)]
    pub io_mode: IoMode,
    /// cycles a simulated substrate may run before reporting that it is
    /// still busy
    #[builder(default = DEFAULT_MAX_CYCLES)]
    pub max_cycles_per_poll: u32,
    /// log the lowered state machines of every compiled module
    #[builder(default)]
    pub dump_machines: bool,
    /// enables debug logging
    #[builder(default)]
    pub debug_logging: bool,
    /// suppresses warnings
    #[builder(default)]
    pub quiet: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RuntimeConfig {
    pub fn get_logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            quiet: self.quiet,
            debug_logging: self.debug_logging,
        }
    }
}

/// Configuration struct describing what settings a logger should be created
/// with.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingConfig {
    /// Whether or not to silence non-error messages. Will be overridden by
    /// `debug_logging` if set to true.
    pub quiet: bool,
    /// Whether or not to enable debug logging. If set to true, will override
    /// `quiet`.
    pub debug_logging: bool,
}
