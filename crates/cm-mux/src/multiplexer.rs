//! Multiplexer core: ticket sequencing and the receive hand-off
//!
//! # Locking
//!
//! Two independent critical sections exist so that sending never waits
//! behind a parked receiver:
//!
//! - the send lock (`next_ticket`, an async mutex) covers ticket assignment
//!   and every write or flush on the connection;
//! - the receive lock (`receive`, a short synchronous mutex) covers the
//!   receive position and the waiter table. It is never held across an
//!   await.
//!
//! Reads are serialized by turn ownership instead of a held lock: only the
//! receiver whose ticket equals the receive position reads, and the
//! position does not move until that read has finished.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use cm_core::config::MuxConfig;
use cm_core::{AdmissionPolicy, Connection, ConnectionError};

use crate::error::{MuxError, Result};
use crate::handle::VirtualConnection;
use crate::ticket::Ticket;

/// Receive-side state guarded by the receive lock
#[derive(Debug, Default)]
struct ReceiveState {
    /// Ticket of the next reply to read from the connection
    position: Ticket,
    /// Receivers parked until `position` reaches their ticket
    waiters: HashMap<Ticket, oneshot::Sender<()>>,
}

/// State shared by a multiplexer and every handle it created
pub(crate) struct Shared<C> {
    pub(crate) conn: C,
    pub(crate) policy: Box<dyn AdmissionPolicy>,
    pub(crate) config: MuxConfig,
    /// Send lock; the guarded value is the next ticket to assign
    pub(crate) next_ticket: Mutex<Ticket>,
    /// Mirror of `next_ticket` readable without the async lock
    sent: AtomicU64,
    receive: SyncMutex<ReceiveState>,
    /// First out-of-sync observation, as (ticket, position)
    corruption: OnceLock<(Ticket, Ticket)>,
    /// First failed write, as (ticket, error). No reply follows that ticket.
    send_failure: OnceLock<(Ticket, ConnectionError)>,
    closed: AtomicBool,
}

/// Deregisters a parked receiver when its wait ends for any reason
struct Registration<'a, C> {
    shared: &'a Shared<C>,
    ticket: Ticket,
}

impl<C> Drop for Registration<'_, C> {
    fn drop(&mut self) {
        // A no-op when the signal was delivered; the sender removed it
        self.shared.receive.lock().waiters.remove(&self.ticket);
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn expired(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

impl<C: Connection> Shared<C> {
    /// Record the ticket just assigned under the send lock
    pub(crate) fn record_sent(&self, next: Ticket) {
        self.sent.store(next.as_u64(), Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Fail if an earlier receive found the stream out of sync
    pub(crate) fn check_corruption(&self) -> Result<()> {
        match self.corruption.get() {
            Some(&(ticket, position)) => Err(MuxError::OutOfSync { ticket, position }),
            None => Ok(()),
        }
    }

    /// Fail if an earlier write failed; nothing after it can be matched
    pub(crate) fn check_send_failure(&self) -> Result<()> {
        match self.send_failure.get() {
            Some((_, err)) => Err(MuxError::Connection(err.clone())),
            None => Ok(()),
        }
    }

    /// Record a write failure for `ticket`. Must be called under the send
    /// lock so no later ticket is handed out first.
    pub(crate) fn fail_send(&self, ticket: Ticket, err: ConnectionError) {
        if self.send_failure.set((ticket, err)).is_ok() {
            tracing::error!("Write for {} failed; refusing further sends", ticket);
        }
    }

    /// The write error recorded for `ticket`, if its command never made it out
    pub(crate) fn failed_send(&self, ticket: Ticket) -> Option<ConnectionError> {
        match self.send_failure.get() {
            Some((failed, err)) if *failed == ticket => Some(err.clone()),
            _ => None,
        }
    }

    /// Mark the multiplexer unusable and release every parked receiver
    pub(crate) fn corrupt(&self, ticket: Ticket, position: Ticket) -> MuxError {
        if self.corruption.set((ticket, position)).is_ok() {
            tracing::error!(
                "Multiplexer out of sync: {} woke at position {}; disabling all handles",
                ticket,
                position
            );
        }
        // Dropping the senders wakes the receivers with an error
        let waiters = std::mem::take(&mut self.receive.lock().waiters);
        drop(waiters);
        MuxError::OutOfSync { ticket, position }
    }

    /// Wait until `ticket` is the next reply to read.
    ///
    /// Returns immediately when it already is. Otherwise parks on a one-shot
    /// signal that the receive for the previous ticket fires. The wait can
    /// be cut short by `cancel` or `timeout`; in that case the waiter entry
    /// is removed, the receive position is left alone, and a signal that
    /// raced with the cancellation is dropped unread. The turn still belongs
    /// to `ticket`, so a later receive for it proceeds without waiting.
    pub(crate) async fn wait_turn(
        &self,
        ticket: Ticket,
        cancel: Option<&CancellationToken>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let signal = {
            let mut state = self.receive.lock();
            // Checked under the lock so a registration cannot slip in
            // after `corrupt` has drained the table
            self.check_corruption()?;
            if state.position == ticket {
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            if state.waiters.insert(ticket, tx).is_some() {
                let position = state.position;
                drop(state);
                return Err(self.corrupt(ticket, position));
            }
            rx
        };
        let _registration = Registration {
            shared: self,
            ticket,
        };

        tracing::debug!("{} waiting for its receive turn", ticket);

        let woken = tokio::select! {
            biased;
            woken = signal => woken,
            _ = cancelled(cancel) => {
                tracing::debug!("{} stopped waiting: cancelled", ticket);
                return Err(MuxError::Cancelled);
            }
            _ = expired(timeout) => {
                let timeout = timeout.unwrap_or_default();
                tracing::warn!("{} stopped waiting after {:?}", ticket, timeout);
                return Err(MuxError::Timeout(timeout));
            }
        };

        let position = self.receive.lock().position;
        if woken.is_err() {
            self.check_corruption()?;
            return Err(self.corrupt(ticket, position));
        }
        if position != ticket {
            return Err(self.corrupt(ticket, position));
        }

        tracing::trace!("{} woke for its turn", ticket);
        Ok(())
    }

    /// Move the receive position past `ticket` and wake the next receiver
    pub(crate) fn advance(&self, ticket: Ticket) {
        let next = ticket.next();
        let waiter = {
            let mut state = self.receive.lock();
            if state.position != ticket {
                let position = state.position;
                drop(state);
                self.corrupt(ticket, position);
                return;
            }
            state.position = next;
            state.waiters.remove(&next)
        };

        if let Some(tx) = waiter {
            if tx.send(()).is_err() {
                tracing::debug!("{} stopped waiting before its turn came", next);
            }
        }
    }
}

/// Shares one connection between any number of [`VirtualConnection`]s
///
/// Cloning a `Multiplexer` is cheap and yields another reference to the
/// same shared connection.
pub struct Multiplexer<C: Connection + 'static> {
    shared: Arc<Shared<C>>,
}

impl<C: Connection + 'static> Clone for Multiplexer<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connection + 'static> Multiplexer<C> {
    /// Wrap an established connection using the default configuration
    pub fn new(conn: C) -> Self {
        Self::with_config(conn, MuxConfig::default())
    }

    /// Wrap an established connection
    pub fn with_config(conn: C, config: MuxConfig) -> Self {
        let policy = config.command_table();
        Self::with_policy(conn, config, policy)
    }

    /// Wrap an established connection with a custom admission policy
    pub fn with_policy<P>(conn: C, config: MuxConfig, policy: P) -> Self
    where
        P: AdmissionPolicy + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                conn,
                policy: Box::new(policy),
                config,
                next_ticket: Mutex::new(Ticket::FIRST),
                sent: AtomicU64::new(0),
                receive: SyncMutex::new(ReceiveState::default()),
                corruption: OnceLock::new(),
                send_failure: OnceLock::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Create a new handle. The caller should `close` it when done.
    pub fn get(&self) -> VirtualConnection<C> {
        VirtualConnection::new(Arc::clone(&self.shared))
    }

    /// Close the underlying connection.
    ///
    /// Handles are expected to have been drained first; tickets still
    /// outstanding will observe the connection's own error. Only the first
    /// call reaches the connection.
    pub async fn close(&self) -> std::result::Result<(), ConnectionError> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::debug!("Closing multiplexed connection ({} pending)", self.pending());
        self.shared.conn.close().await
    }

    /// Number of commands sent whose replies have not been read yet
    pub fn pending(&self) -> u64 {
        let sent = self.shared.sent.load(Ordering::Acquire);
        let received = self.shared.receive.lock().position.as_u64();
        sent.wrapping_sub(received)
    }

    /// Whether an out-of-sync condition has disabled this multiplexer
    pub fn is_corrupted(&self) -> bool {
        self.shared.corruption.get().is_some()
    }

    /// The write failure that stopped this multiplexer accepting commands
    pub fn send_failure(&self) -> Option<ConnectionError> {
        self.shared.send_failure.get().map(|(_, err)| err.clone())
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// The configuration this multiplexer was created with
    pub fn config(&self) -> &MuxConfig {
        &self.shared.config
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Shared<C> {
        &self.shared
    }
}

#[cfg(test)]
impl<C> Shared<C> {
    pub(crate) fn waiter_count(&self) -> usize {
        self.receive.lock().waiters.len()
    }

    pub(crate) fn position(&self) -> Ticket {
        self.receive.lock().position
    }

    /// Move the receive position without reading, bypassing the handles
    pub(crate) fn force_position(&self, position: Ticket) {
        self.receive.lock().position = position;
    }

    /// Fire a parked receiver's signal without moving the position
    pub(crate) fn force_wake(&self, ticket: Ticket) -> bool {
        match self.receive.lock().waiters.remove(&ticket) {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use cm_core::{Command, Reply};
    use std::collections::VecDeque;

    /// Answers every command with its own name once flushed
    #[derive(Default)]
    pub(crate) struct EchoConnection {
        queued: SyncMutex<VecDeque<String>>,
        flushed: SyncMutex<VecDeque<String>>,
        closes: AtomicU64,
    }

    #[async_trait]
    impl Connection for EchoConnection {
        async fn send(&self, command: &Command) -> std::result::Result<(), ConnectionError> {
            self.queued.lock().push_back(command.to_string());
            Ok(())
        }

        async fn flush(&self) -> std::result::Result<(), ConnectionError> {
            let mut queued = self.queued.lock();
            self.flushed.lock().extend(queued.drain(..));
            Ok(())
        }

        async fn receive(&self) -> std::result::Result<Reply, ConnectionError> {
            self.flushed
                .lock()
                .pop_front()
                .map(Reply::Status)
                .ok_or_else(|| ConnectionError::Protocol("nothing to read".into()))
        }

        async fn close(&self) -> std::result::Result<(), ConnectionError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn err(&self) -> Option<ConnectionError> {
            None
        }
    }

    async fn wait_for_waiters<C>(shared: &Shared<C>, n: usize) {
        while shared.waiter_count() != n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_new_multiplexer_is_idle() {
        let mux = Multiplexer::new(EchoConnection::default());
        assert_eq!(mux.pending(), 0);
        assert!(!mux.is_corrupted());
        assert!(!mux.is_closed());
        assert_eq!(mux.shared().position(), Ticket::FIRST);
    }

    #[tokio::test]
    async fn test_close_reaches_connection_once() {
        let conn = Arc::new(EchoConnection::default());
        let mux = Multiplexer::new(Arc::clone(&conn));

        mux.close().await.unwrap();
        mux.close().await.unwrap();

        assert!(mux.is_closed());
        assert_eq!(conn.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_turn_returns_immediately_on_turn() {
        let mux = Multiplexer::new(EchoConnection::default());
        mux.shared()
            .wait_turn(Ticket::FIRST, None, None)
            .await
            .unwrap();
        assert_eq!(mux.shared().waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_advance_wakes_next_waiter() {
        let mux = Multiplexer::new(EchoConnection::default());
        let waiter = {
            let mux = mux.clone();
            tokio::spawn(async move { mux.shared().wait_turn(Ticket(1), None, None).await })
        };

        wait_for_waiters(mux.shared(), 1).await;
        mux.shared().advance(Ticket::FIRST);

        waiter.await.unwrap().unwrap();
        assert_eq!(mux.shared().position(), Ticket(1));
        assert_eq!(mux.shared().waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_deregisters_waiter() {
        let mux = Multiplexer::new(EchoConnection::default());
        let token = CancellationToken::new();
        let waiter = {
            let mux = mux.clone();
            let token = token.clone();
            tokio::spawn(async move {
                mux.shared()
                    .wait_turn(Ticket(1), Some(&token), None)
                    .await
            })
        };

        wait_for_waiters(mux.shared(), 1).await;
        token.cancel();

        assert!(matches!(waiter.await.unwrap(), Err(MuxError::Cancelled)));
        assert_eq!(mux.shared().waiter_count(), 0);
        assert_eq!(mux.shared().position(), Ticket::FIRST);

        // Nobody is left to signal; advancing must not fail
        mux.shared().advance(Ticket::FIRST);
        assert_eq!(mux.shared().position(), Ticket(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_deregisters_waiter() {
        let mux = Multiplexer::new(EchoConnection::default());
        let result = mux
            .shared()
            .wait_turn(Ticket(2), None, Some(Duration::from_secs(1)))
            .await;

        assert!(matches!(result, Err(MuxError::Timeout(d)) if d == Duration::from_secs(1)));
        assert_eq!(mux.shared().waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_wake_at_wrong_position_corrupts() {
        let mux = Multiplexer::new(EchoConnection::default());
        let early = {
            let mux = mux.clone();
            tokio::spawn(async move { mux.shared().wait_turn(Ticket(5), None, None).await })
        };
        let bystander = {
            let mux = mux.clone();
            tokio::spawn(async move { mux.shared().wait_turn(Ticket(7), None, None).await })
        };

        wait_for_waiters(mux.shared(), 2).await;
        mux.shared().force_position(Ticket(4));
        assert!(mux.shared().force_wake(Ticket(5)));

        let err = early.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            MuxError::OutOfSync {
                ticket: Ticket(5),
                position: Ticket(4)
            }
        ));
        assert!(mux.is_corrupted());

        // Every other parked receiver is released with the same failure
        let err = bystander.await.unwrap().unwrap_err();
        assert!(matches!(err, MuxError::OutOfSync { .. }));
        assert!(mux.shared().check_corruption().is_err());
    }
}
