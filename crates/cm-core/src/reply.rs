//! Reply values returned by a connection

use std::fmt;

/// A single reply read from a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Simple status line
    Status(String),
    /// Error reported by the server; a value, not a transport failure
    Error(String),
}

impl Reply {
    /// Create a status reply
    pub fn status(s: impl Into<String>) -> Self {
        Reply::Status(s.into())
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Status(s) => write!(f, "{}", s),
            Reply::Error(s) => write!(f, "(error) {}", s),
        }
    }
}
