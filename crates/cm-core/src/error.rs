//! Core error types for connmux

use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by an underlying connection
///
/// Cloneable so a connection can keep its first fatal error around and
/// hand it out from [`Connection::err`](crate::Connection::err).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// I/O failure on the transport
    #[error("I/O error: {0}")]
    Io(String),

    /// Peer closed the connection
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Connection was closed locally
    #[error("Connection closed")]
    Closed,

    /// Malformed data on the wire
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe => ConnectionError::ConnectionLost(e.to_string()),
            _ => ConnectionError::Io(e.to_string()),
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
