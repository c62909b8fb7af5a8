use sluice_engine::BoxedRuntimeError;
use thiserror::Error;

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors of the server and of the client side of a connection.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),

    /// A length prefix larger than the configured message bound
    #[error("message of {len} bytes exceeds the bound of {max}")]
    TooLarge { len: usize, max: usize },

    #[error("expected {expected}, received {received}")]
    Unexpected {
        expected: &'static str,
        received: &'static str,
    },

    /// The peer answered a request with `fail`
    #[error("{0} failed")]
    Failed(&'static str),

    /// The peer answered a request with `fail` and a reason
    #[error("server refused the request: {0}")]
    Refused(String),

    /// The caller's own stream failed while serving an engine
    #[error("stream operation failed: {0}")]
    Stream(std::io::Error),

    #[error("no client with id {0}")]
    UnknownClient(u32),

    #[error("malformed endpoint `{0}'")]
    Endpoint(String),

    #[error(transparent)]
    Engine(#[from] BoxedRuntimeError),

    #[error(transparent)]
    Config(#[from] Box<figment::Error>),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl From<figment::Error> for RemoteError {
    fn from(e: figment::Error) -> Self {
        RemoteError::Config(Box::new(e))
    }
}

impl From<sluice_engine::RuntimeError> for RemoteError {
    fn from(e: sluice_engine::RuntimeError) -> Self {
        RemoteError::Engine(e.into())
    }
}
