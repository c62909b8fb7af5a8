//! Errors generated while parsing, validating and lowering modules.
use std::fmt;

/// Convience wrapper to represent success or meaningul compiler error.
pub type SluiceResult<T> = std::result::Result<T, Error>;

/// Errors generated by the compiler crates.
#[derive(Clone)]
pub struct Error {
    kind: Box<ErrorKind>,
    post_msg: Option<String>,
}

/// The kinds of compile-time errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input could not be decoded into a module.
    InvalidFile(String),
    /// A node refers to something that is not defined.
    Undefined { name: String, typ: String },
    /// The module tree violates a structural rule.
    MalformedStructure(String),
    /// A pass found a construct it cannot handle.
    PassAssumption { pass: String, msg: String },
    /// A back end cannot accept the module.
    Unsupported(String),
    /// Catch-all.
    Misc(String),
}

impl Error {
    pub fn invalid_file<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::InvalidFile(msg.to_string()))
    }

    pub fn undefined<S: ToString>(name: S, typ: S) -> Self {
        Self::new(ErrorKind::Undefined {
            name: name.to_string(),
            typ: typ.to_string(),
        })
    }

    pub fn malformed_structure<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::MalformedStructure(msg.to_string()))
    }

    pub fn pass_assumption<S: ToString, M: ToString>(pass: S, msg: M) -> Self {
        Self::new(ErrorKind::PassAssumption {
            pass: pass.to_string(),
            msg: msg.to_string(),
        })
    }

    pub fn unsupported<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::Unsupported(msg.to_string()))
    }

    pub fn misc<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::Misc(msg.to_string()))
    }

    fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
            post_msg: None,
        }
    }

    /// Attach a trailing note to the error message.
    pub fn with_post_msg(mut self, msg: Option<String>) -> Self {
        self.post_msg = msg;
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn message(&self) -> String {
        match &*self.kind {
            ErrorKind::InvalidFile(msg) => format!("Invalid file: {msg}"),
            ErrorKind::Undefined { name, typ } => {
                format!("Undefined {typ}: {name}")
            }
            ErrorKind::MalformedStructure(msg) => {
                format!("Malformed structure: {msg}")
            }
            ErrorKind::PassAssumption { pass, msg } => {
                format!("Pass `{pass}` assumption violated: {msg}")
            }
            ErrorKind::Unsupported(msg) => format!("Unsupported: {msg}"),
            ErrorKind::Misc(msg) => msg.clone(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())?;
        if let Some(post) = &self.post_msg {
            write!(f, "\n{post}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::invalid_file(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::misc(format!("IO error: {e}"))
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(err: std::str::Utf8Error) -> Self {
        Error::invalid_file(err)
    }
}
