//! cm-mux: Share one ordered request/response connection between callers
//!
//! A [`Multiplexer`] owns a single [`Connection`](cm_core::Connection) and
//! hands out [`VirtualConnection`] handles. Each handle looks like an
//! ordinary connection (`send`, `flush`, `receive`, `execute`, `close`,
//! `err`) but routes its traffic through the shared transport.
//!
//! # Ordering model
//!
//! Every accepted `send` takes the next ticket from a global counter while
//! holding the send lock, so tickets follow the order in which commands hit
//! the wire. Replies come back in the same order. A handle remembers its own
//! tickets, and `receive` waits until the global receive position reaches
//! the oldest of them before reading. Whoever reads reply `N` advances the
//! position to `N + 1` and wakes the handle parked on that ticket, if any.
//!
//! ```ignore
//! let mux = Multiplexer::new(conn);
//! let mut a = mux.get();
//! let mut b = mux.get();
//!
//! a.send(&Command::new("GET").arg("x")).await?;   // ticket 0
//! b.send(&Command::new("GET").arg("y")).await?;   // ticket 1
//! b.flush().await?;
//!
//! // `b` parks until someone consumes reply 0
//! let (ra, rb) = tokio::join!(a.receive(), b.receive());
//! ```
//!
//! Commands that leave server-side state on the connection (`WATCH`,
//! `MULTI`, `SUBSCRIBE`, `MONITOR`, ...) are refused with
//! [`MuxError::CommandRejected`] before anything is written.

pub mod error;
pub mod handle;
pub mod multiplexer;
pub mod ticket;

pub use error::{MuxError, Result};
pub use handle::VirtualConnection;
pub use multiplexer::Multiplexer;
pub use ticket::Ticket;
