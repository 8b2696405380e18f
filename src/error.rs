use std::fmt::Display;

/// A specialized `Result` for Raft core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the Raft core.
///
/// Protocol rejections (`vote_granted=false`, `success=false`) are ordinary response values,
/// never an `Error` — this enum is only for conditions the spec calls out as actual errors:
/// invariant violations, persistence failures, and transport-adjacent plumbing failures.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// An internal bug or a violated safety invariant (e.g. an attempt to truncate committed
    /// log entries, or a persistent-state regression). The embedder should halt the node.
    Internal(String),
    /// The durability collaborator failed to save or load a snapshot.
    Persistence(String),
    /// A malformed request was received (e.g. a bad configuration value).
    Parse(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
            Error::Persistence(msg) => write!(f, "Persistence error: {}", msg),
            Error::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Parse(err.to_string())
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        Error::Internal(status.message().to_string())
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Internal(err.to_string())
    }
}
