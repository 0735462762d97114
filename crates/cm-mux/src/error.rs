use std::time::Duration;

use cm_core::ConnectionError;
use thiserror::Error;

use crate::ticket::Ticket;

/// Convenient type alias for `Result<T, MuxError>`.
pub type Result<T> = std::result::Result<T, MuxError>;

/// Errors returned by a multiplexer and its handles
#[derive(Debug, Error)]
pub enum MuxError {
    /// The command would attach server state to the shared connection;
    /// send it over a dedicated connection instead
    #[error("Command not supported by multiplexer: {0}")]
    CommandRejected(String),

    /// `receive` was called without a matching `send`
    #[error("Receive called with no outstanding command")]
    TicketUnderflow,

    /// The shared stream position no longer matches a woken receiver.
    /// The multiplexer is unusable once this has been reported.
    #[error("Multiplexer out of sync: {ticket} woke at receive position {position}")]
    OutOfSync { ticket: Ticket, position: Ticket },

    /// The wait for the receive turn was cancelled
    #[error("Receive cancelled while waiting for its turn")]
    Cancelled,

    /// The wait for the receive turn timed out
    #[error("Timed out after {0:?} waiting for receive turn")]
    Timeout(Duration),

    /// The multiplexer has been closed
    #[error("Multiplexer closed")]
    Closed,

    /// Error from the underlying connection, passed through unchanged
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl MuxError {
    /// Errors after which the handle, or the whole multiplexer, should not
    /// be used again
    pub fn is_fatal(&self) -> bool {
        match self {
            MuxError::OutOfSync { .. } | MuxError::Closed | MuxError::Connection(_) => true,
            MuxError::CommandRejected(_)
            | MuxError::TicketUnderflow
            | MuxError::Cancelled
            | MuxError::Timeout(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(MuxError::OutOfSync {
            ticket: Ticket(3),
            position: Ticket(1)
        }
        .is_fatal());
        assert!(MuxError::Connection(ConnectionError::Closed).is_fatal());
        assert!(!MuxError::CommandRejected("MULTI".into()).is_fatal());
        assert!(!MuxError::Timeout(Duration::from_secs(1)).is_fatal());
        assert!(!MuxError::TicketUnderflow.is_fatal());
    }

    #[test]
    fn test_error_messages() {
        let err = MuxError::OutOfSync {
            ticket: Ticket(3),
            position: Ticket(1),
        };
        assert_eq!(
            err.to_string(),
            "Multiplexer out of sync: ticket-3 woke at receive position ticket-1"
        );

        let err: MuxError = ConnectionError::Io("reset".into()).into();
        assert_eq!(err.to_string(), "I/O error: reset");
    }
}
