//! Multiplexer configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::option_duration_secs;
use crate::command::CommandTable;

/// Configuration for a multiplexer and the handles it hands out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    /// How long a plain `receive` may wait for its turn.
    ///
    /// `None` waits indefinitely. Once a receiver owns its turn the read
    /// itself is not bounded by this value.
    #[serde(
        with = "option_duration_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub receive_timeout: Option<Duration>,

    /// Command names refused in addition to the built-in table
    pub deny_commands: Vec<String>,

    /// Drain outstanding tickets of handles dropped without `close`
    pub drain_on_drop: bool,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            receive_timeout: None,
            deny_commands: vec![],
            drain_on_drop: true,
        }
    }
}

impl MuxConfig {
    /// Build the admission table described by this configuration
    pub fn command_table(&self) -> CommandTable {
        CommandTable::with_denied(&self.deny_commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::AdmissionPolicy;

    #[test]
    fn test_defaults() {
        let config = MuxConfig::default();
        assert!(config.receive_timeout.is_none());
        assert!(config.deny_commands.is_empty());
        assert!(config.drain_on_drop);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: MuxConfig = toml::from_str("receive_timeout = 3").unwrap();
        assert_eq!(config.receive_timeout, Some(Duration::from_secs(3)));
        assert!(config.drain_on_drop);
    }

    #[test]
    fn test_timeout_written_as_seconds() {
        let config = MuxConfig {
            receive_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("receive_timeout = 5"));
        assert_eq!(toml::from_str::<MuxConfig>(&text).unwrap(), config);

        let text = toml::to_string(&MuxConfig::default()).unwrap();
        assert!(!text.contains("receive_timeout"));
    }

    #[test]
    fn test_command_table_from_config() {
        let config = MuxConfig {
            deny_commands: vec!["select".to_string()],
            ..Default::default()
        };
        let table = config.command_table();
        assert!(!table.is_multiplexable("SELECT"));
        assert!(!table.is_multiplexable("MULTI"));
        assert!(table.is_multiplexable("GET"));
    }
}
