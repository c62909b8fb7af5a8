use crate::substrate::daemon::DaemonStatus;
use thiserror::Error;

/// A type alias for a result with an [BoxedRuntimeError] as the error type
pub type RuntimeResult<T> = Result<T, BoxedRuntimeError>;

/// A wrapper type for [RuntimeError]. This exists to allow a smaller return
/// size for results since the error type is large.
pub struct BoxedRuntimeError(Box<RuntimeError>);

impl BoxedRuntimeError {
    /// Get a mutable reference to the inner error
    pub fn inner_mut(&mut self) -> &mut RuntimeError {
        &mut self.0
    }

    pub fn into_inner(self) -> RuntimeError {
        *self.0
    }
}

impl std::fmt::Display for BoxedRuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&*self.0, f)
    }
}

impl std::fmt::Debug for BoxedRuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self, f)
    }
}

impl std::error::Error for BoxedRuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl std::ops::Deref for BoxedRuntimeError {
    type Target = RuntimeError;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> From<T> for BoxedRuntimeError
where
    T: Into<RuntimeError>,
{
    fn from(e: T) -> Self {
        Self(Box::new(T::into(e)))
    }
}

/// Errors raised while compiling a module for a back end or while driving a
/// compiled engine.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Malformed module or a failed lowering pass
    #[error("{}", .0.message())]
    Compile(#[from] sluice_utils::Error),

    /// There is no back end registered under the given name
    #[error("`{name}' is not a valid backend. Valid backends: {valid}")]
    UnknownBackend { name: String, valid: String },

    /// An engine variable id that the module does not declare
    #[error("variable id {0} is not declared by this engine")]
    UnknownVariable(u32),

    /// The substrate reported a task id that was never indexed
    #[error("task id {0} does not name a task of this module")]
    UnknownTask(u64),

    /// The device daemon rejected a register access
    #[error("device daemon reported {status} accessing address {addr:#x}")]
    Daemon { status: DaemonStatus, addr: u64 },

    /// A compile was stopped before it finished
    #[error("compile was cancelled")]
    Cancelled,

    /// An external command terminated unsuccessfully
    #[error("`{command}' exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    /// A toolchain finished but did not name the app it built
    #[error("toolchain printed `{0}' instead of an app id")]
    Toolchain(String),

    /// A server hosting the engine failed the call or broke the protocol
    #[error("remote engine: {0}")]
    Remote(String),

    /// The back end cannot run this module
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A wrapper for IO errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A wrapper for serialization errors
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}
