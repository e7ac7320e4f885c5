use std::io;
use thiserror::Error;

/// Error types for the timing IOC bridge
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Unknown variable {0}")]
    UnknownVariable(u8),

    #[error("Variable {id} holds {expected} bytes, got {actual}")]
    SizeMismatch { id: u8, expected: usize, actual: usize },

    #[error("Variable {0} is read-only")]
    ReadOnly(u8),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Daemon error: {0}")]
    Daemon(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fatal error: {0}")]
    Fatal(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Creates a new registry error
    pub fn registry(msg: impl Into<String>) -> Self {
        Error::Registry(msg.into())
    }

    /// Creates a new parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }

    /// Creates a new missing field error
    pub fn missing_field(name: impl Into<String>) -> Self {
        Error::MissingField(name.into())
    }

    /// Creates a new daemon error
    pub fn daemon(msg: impl Into<String>) -> Self {
        Error::Daemon(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new fatal error
    pub fn fatal(msg: impl Into<String>) -> Self {
        Error::Fatal(msg.into())
    }

    /// Whether the error must raise the process-wide fault rather than
    /// just cost one polling cycle
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_) | Error::MissingField(_))
    }
}
