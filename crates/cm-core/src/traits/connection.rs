//! Connection traits

use async_trait::async_trait;
use std::sync::Arc;

use crate::command::Command;
use crate::error::ConnectionError;
use crate::reply::Reply;

/// Abstraction over a request/response connection
///
/// Implementations must deliver replies in exactly the order the commands
/// were written. The multiplexer relies on this and does not check it.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Write a command to the output buffer
    async fn send(&self, command: &Command) -> Result<(), ConnectionError>;

    /// Flush buffered commands to the server
    async fn flush(&self) -> Result<(), ConnectionError>;

    /// Read the next reply
    async fn receive(&self) -> Result<Reply, ConnectionError>;

    /// Send a command, flush, and read its reply
    async fn execute(&self, command: &Command) -> Result<Reply, ConnectionError> {
        self.send(command).await?;
        self.flush().await?;
        self.receive().await
    }

    /// Close the connection
    async fn close(&self) -> Result<(), ConnectionError>;

    /// The fatal error that broke this connection, if any
    fn err(&self) -> Option<ConnectionError>;
}

#[async_trait]
impl<C: Connection + ?Sized> Connection for Arc<C> {
    async fn send(&self, command: &Command) -> Result<(), ConnectionError> {
        (**self).send(command).await
    }

    async fn flush(&self) -> Result<(), ConnectionError> {
        (**self).flush().await
    }

    async fn receive(&self) -> Result<Reply, ConnectionError> {
        (**self).receive().await
    }

    async fn execute(&self, command: &Command) -> Result<Reply, ConnectionError> {
        (**self).execute(command).await
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        (**self).close().await
    }

    fn err(&self) -> Option<ConnectionError> {
        (**self).err()
    }
}
