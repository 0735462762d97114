//! Ticket identifier type

use std::fmt;

/// Position of one command in the shared send/receive stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(pub u64);

impl Ticket {
    /// The first ticket handed out by a multiplexer
    pub const FIRST: Ticket = Ticket(0);

    /// Create a ticket from its raw value
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ticket value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The ticket immediately after this one
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ticket-{}", self.0)
    }
}

impl From<u64> for Ticket {
    fn from(id: u64) -> Self {
        Self(id)
    }
}
