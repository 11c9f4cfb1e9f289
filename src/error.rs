use std::io;

use thiserror::Error;

/// A malformed request frame. Fatal for the connection that sent it.
///
/// The `Display` text is written back to the client verbatim before the
/// connection is closed, so it must stay stable.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid length")]
    InvalidLength,
    #[error("invalid protocol")]
    InvalidProtocol,
    #[error("invalid message format")]
    InvalidFormat,
    #[error("invalid number of arguments")]
    InvalidArgCount,
}

/// Recoverable command failures, answered with a `-ERR` reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("wrong number of arguments for '{0}' command")]
    Arity(&'static str),
    #[error("invalid expiration time")]
    InvalidExpiration,
    #[error("{0}")]
    Argument(String),
    #[error("Unknown command")]
    Unknown,
    #[error("Empty command")]
    Empty,
    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("could not reach replica at {addr} after {attempts} attempts")]
    Dial {
        addr: String,
        attempts: usize,
        #[source]
        source: io::Error,
    },
    #[error("write to replica {addr} failed")]
    Propagation {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("write to replica {addr} timed out")]
    PropagationTimeout { addr: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid --replicaof value {0:?}, expected \"<host> <port>\"")]
    InvalidReplicaOf(String),
}
