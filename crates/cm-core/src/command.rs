//! Commands and the admission table
//!
//! Some commands attach server-side state to the connection they are sent
//! on (a watched key set, an open transaction, a subscription, a monitor
//! stream). Such state cannot be attributed to one caller once the
//! connection is shared, so the multiplexer refuses them up front. The
//! [`CommandTable`] records which commands set and which commands clear
//! connection state; only the former are refused.

use bytes::Bytes;
use std::collections::HashSet;
use std::fmt;

/// A command name plus its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<Bytes>,
}

impl Command {
    /// Create a command with no arguments
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument
    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(Bytes::copy_from_slice(arg.as_ref()));
        self
    }

    /// Append several arguments
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.args
            .extend(args.into_iter().map(|a| Bytes::copy_from_slice(a.as_ref())));
        self
    }

    /// Command name as given by the caller
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Command arguments
    pub fn arguments(&self) -> &[Bytes] {
        &self.args
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for arg in &self.args {
            write!(f, " {}", String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}

/// Connection-scoped server state a command can enter or leave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnState {
    /// Keys are being watched for an optimistic transaction
    Watch,
    /// A transaction is open
    Multi,
    /// The connection is in publish/subscribe mode
    Subscribe,
    /// The connection streams every command the server processes
    Monitor,
}

impl ConnState {
    const fn bit(self) -> u8 {
        match self {
            ConnState::Watch => 1,
            ConnState::Multi => 1 << 1,
            ConnState::Subscribe => 1 << 2,
            ConnState::Monitor => 1 << 3,
        }
    }
}

/// A small set of [`ConnState`] flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateSet(u8);

impl StateSet {
    /// The empty set
    pub const EMPTY: StateSet = StateSet(0);

    /// Return a copy of the set with `state` added
    pub const fn with(self, state: ConnState) -> Self {
        StateSet(self.0 | state.bit())
    }

    /// Check membership
    pub fn contains(&self, state: ConnState) -> bool {
        self.0 & state.bit() != 0
    }

    /// Check if no flag is set
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// How a command affects connection state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandInfo {
    /// States the command enters
    pub set: StateSet,
    /// States the command leaves
    pub clear: StateSet,
}

impl CommandInfo {
    const fn sets(state: ConnState) -> Self {
        Self {
            set: StateSet::EMPTY.with(state),
            clear: StateSet::EMPTY,
        }
    }

    const fn clears(clear: StateSet) -> Self {
        Self {
            set: StateSet::EMPTY,
            clear,
        }
    }

    /// Look up a command by name, ignoring ASCII case
    pub fn lookup(name: &str) -> Self {
        let upper = name.to_ascii_uppercase();
        match upper.as_str() {
            "WATCH" => Self::sets(ConnState::Watch),
            "UNWATCH" => Self::clears(StateSet::EMPTY.with(ConnState::Watch)),
            "MULTI" => Self::sets(ConnState::Multi),
            "EXEC" | "DISCARD" => Self::clears(
                StateSet::EMPTY
                    .with(ConnState::Watch)
                    .with(ConnState::Multi),
            ),
            "SUBSCRIBE" | "PSUBSCRIBE" => Self::sets(ConnState::Subscribe),
            "UNSUBSCRIBE" | "PUNSUBSCRIBE" => {
                Self::clears(StateSet::EMPTY.with(ConnState::Subscribe))
            }
            "MONITOR" => Self::sets(ConnState::Monitor),
            _ => Self::default(),
        }
    }
}

/// Decides whether a command may be sent over a shared connection
pub trait AdmissionPolicy: Send + Sync {
    /// Returns false for commands that would put the connection into a
    /// state or mode that cannot be attributed to a single caller
    fn is_multiplexable(&self, command: &str) -> bool;
}

/// Default admission policy backed by [`CommandInfo::lookup`]
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    /// Extra command names refused, stored upper-case
    denied: HashSet<String>,
}

impl CommandTable {
    /// Create a table with only the built-in classification
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table that also refuses the given command names
    pub fn with_denied<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            denied: names
                .into_iter()
                .map(|n| n.as_ref().to_ascii_uppercase())
                .collect(),
        }
    }
}

impl AdmissionPolicy for CommandTable {
    fn is_multiplexable(&self, command: &str) -> bool {
        if !CommandInfo::lookup(command).set.is_empty() {
            return false;
        }
        self.denied.is_empty() || !self.denied.contains(&command.to_ascii_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_setting_commands_rejected() {
        let table = CommandTable::new();
        for name in ["WATCH", "MULTI", "SUBSCRIBE", "PSUBSCRIBE", "MONITOR"] {
            assert!(!table.is_multiplexable(name), "{} should be rejected", name);
        }
    }

    #[test]
    fn test_state_clearing_commands_admitted() {
        let table = CommandTable::new();
        for name in ["UNWATCH", "EXEC", "DISCARD", "UNSUBSCRIBE", "PUNSUBSCRIBE"] {
            assert!(table.is_multiplexable(name), "{} should be admitted", name);
        }
        assert!(table.is_multiplexable("GET"));
        assert!(table.is_multiplexable("PING"));
    }

    #[test]
    fn test_lookup_ignores_case() {
        assert_eq!(CommandInfo::lookup("watch"), CommandInfo::lookup("WATCH"));
        assert!(!CommandTable::new().is_multiplexable("Subscribe"));
    }

    #[test]
    fn test_exec_clears_watch_and_multi() {
        let info = CommandInfo::lookup("EXEC");
        assert!(info.set.is_empty());
        assert!(info.clear.contains(ConnState::Watch));
        assert!(info.clear.contains(ConnState::Multi));
        assert!(!info.clear.contains(ConnState::Monitor));
    }

    #[test]
    fn test_extra_denied_commands() {
        let table = CommandTable::with_denied(["select", "CLIENT"]);
        assert!(!table.is_multiplexable("SELECT"));
        assert!(!table.is_multiplexable("client"));
        assert!(table.is_multiplexable("GET"));
    }

    #[test]
    fn test_command_display() {
        let cmd = Command::new("SET").arg("key").arg(b"value");
        assert_eq!(cmd.to_string(), "SET key value");
        assert_eq!(cmd.arguments().len(), 2);
        assert_eq!(Command::new("MGET").args(["a", "b"]).to_string(), "MGET a b");
    }
}
