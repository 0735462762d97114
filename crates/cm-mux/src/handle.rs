//! Per-caller virtual connections

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use cm_core::{Command, Connection, ConnectionError, Reply};

use crate::error::{MuxError, Result};
use crate::multiplexer::Shared;
use crate::ticket::Ticket;

/// Advances the receive position once the holder's read is over,
/// including when the read future is dropped halfway
struct Turn<'a, C: Connection> {
    shared: &'a Shared<C>,
    ticket: Ticket,
}

impl<C: Connection> Drop for Turn<'_, C> {
    fn drop(&mut self) {
        self.shared.advance(self.ticket);
    }
}

/// A connection handle backed by a shared [`Multiplexer`](crate::Multiplexer)
///
/// Offers the same operations as a plain connection. Commands from
/// different handles never interleave on the wire, and each handle reads
/// back exactly the replies to its own commands, in the order it sent them.
///
/// A handle is not meant to be used from several tasks at once; create one
/// handle per task instead.
pub struct VirtualConnection<C: Connection + 'static> {
    shared: Arc<Shared<C>>,
    /// Tickets sent but not yet received, oldest first
    outstanding: VecDeque<Ticket>,
}

impl<C: Connection + 'static> VirtualConnection<C> {
    pub(crate) fn new(shared: Arc<Shared<C>>) -> Self {
        Self {
            shared,
            outstanding: VecDeque::new(),
        }
    }

    /// Tickets this handle has sent and not yet received, oldest first
    pub fn outstanding(&self) -> impl Iterator<Item = Ticket> + '_ {
        self.outstanding.iter().copied()
    }

    /// Number of replies this handle still has to read
    pub fn pending(&self) -> usize {
        self.outstanding.len()
    }

    async fn send_inner(&mut self, command: &Command, flush: bool) -> Result<()> {
        if !self.shared.policy.is_multiplexable(command.name()) {
            tracing::debug!("Rejected {} on multiplexed connection", command.name());
            return Err(MuxError::CommandRejected(command.name().to_string()));
        }
        self.shared.check_corruption()?;
        if self.shared.is_closed() {
            return Err(MuxError::Closed);
        }

        let mut next = self.shared.next_ticket.lock().await;
        self.shared.check_send_failure()?;
        let ticket = *next;
        self.outstanding.push_back(ticket);
        *next = ticket.next();
        self.shared.record_sent(*next);
        tracing::trace!("{} assigned to {}", ticket, command.name());

        if let Err(e) = self.shared.conn.send(command).await {
            self.shared.fail_send(ticket, e.clone());
            return Err(e.into());
        }
        if flush {
            self.shared.conn.flush().await?;
        }
        Ok(())
    }

    /// Write a command to the shared connection's output buffer.
    ///
    /// Fails with [`MuxError::CommandRejected`] without writing anything
    /// when the command would leave state on the shared connection.
    ///
    /// If the connection fails the write, the ticket stays outstanding and
    /// its receive returns the same error without reading. The multiplexer
    /// accepts no further commands after that.
    pub async fn send(&mut self, command: &Command) -> Result<()> {
        self.send_inner(command, false).await
    }

    /// Flush the shared connection
    pub async fn flush(&mut self) -> Result<()> {
        let _send = self.shared.next_ticket.lock().await;
        self.shared.conn.flush().await?;
        Ok(())
    }

    async fn receive_inner(
        &mut self,
        cancel: Option<&CancellationToken>,
        timeout: Option<Duration>,
    ) -> Result<Reply> {
        let ticket = *self.outstanding.front().ok_or(MuxError::TicketUnderflow)?;
        self.shared.wait_turn(ticket, cancel, timeout).await?;

        // From here on the turn is ours and must be passed on
        self.outstanding.pop_front();
        let turn = Turn {
            shared: &*self.shared,
            ticket,
        };
        if let Some(err) = self.shared.failed_send(ticket) {
            // The command never reached the server; reading would steal
            // the next handle's reply
            drop(turn);
            return Err(err.into());
        }
        let reply = self.shared.conn.receive().await;
        drop(turn);

        tracing::trace!("{} received", ticket);
        Ok(reply?)
    }

    /// Read the reply to this handle's oldest outstanding command.
    ///
    /// Waits while replies to other handles' earlier commands are still
    /// unread, bounded by the configured `receive_timeout` if any.
    pub async fn receive(&mut self) -> Result<Reply> {
        let timeout = self.shared.config.receive_timeout;
        self.receive_inner(None, timeout).await
    }

    /// Like [`receive`](Self::receive), giving up when `cancel` fires
    /// before this handle's turn comes.
    ///
    /// A cancelled receive leaves the command outstanding; its reply is
    /// returned by the next receive on this handle.
    pub async fn receive_with_cancel(&mut self, cancel: &CancellationToken) -> Result<Reply> {
        self.receive_inner(Some(cancel), None).await
    }

    /// Like [`receive`](Self::receive) with an explicit bound on the wait
    /// for this handle's turn.
    pub async fn receive_timeout(&mut self, timeout: Duration) -> Result<Reply> {
        self.receive_inner(None, Some(timeout)).await
    }

    /// Send a command, flush, and read its reply
    pub async fn execute(&mut self, command: &Command) -> Result<Reply> {
        self.send_inner(command, true).await?;
        self.receive().await
    }

    /// Drain every outstanding reply so other handles are not left waiting.
    ///
    /// Returns the last error seen while draining; earlier ones are logged.
    pub async fn close(&mut self) -> Result<()> {
        if self.outstanding.is_empty() {
            return Ok(());
        }
        tracing::debug!("Draining {} outstanding replies", self.outstanding.len());

        let mut last_err = self.flush().await.err();
        while !self.outstanding.is_empty() {
            match self.receive_inner(None, None).await {
                Ok(_) => {}
                Err(e) => {
                    let fatal = matches!(e, MuxError::OutOfSync { .. });
                    if let Some(prev) = last_err.replace(e) {
                        tracing::warn!("Error while draining handle: {}", prev);
                    }
                    if fatal {
                        self.outstanding.clear();
                        break;
                    }
                }
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// The fatal error of the shared connection, if any
    pub fn err(&self) -> Option<ConnectionError> {
        self.shared.conn.err()
    }
}

impl<C: Connection + 'static> Drop for VirtualConnection<C> {
    fn drop(&mut self) {
        if self.outstanding.is_empty() {
            return;
        }
        let count = self.outstanding.len();
        if !self.shared.config.drain_on_drop || self.shared.check_corruption().is_err() {
            tracing::warn!("Handle dropped with {} unread replies", count);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let mut orphan = VirtualConnection {
                    shared: Arc::clone(&self.shared),
                    outstanding: std::mem::take(&mut self.outstanding),
                };
                tracing::debug!("Handle dropped with {} unread replies; draining", count);
                runtime.spawn(async move {
                    if let Err(e) = orphan.close().await {
                        tracing::warn!("Failed to drain dropped handle: {}", e);
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    "Handle dropped with {} unread replies outside a runtime; \
                     later receives on this multiplexer will stall",
                    count
                );
            }
        }
    }
}
