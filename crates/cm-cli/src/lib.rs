//! connmux: Command-line interface for the connection multiplexer
//!
//! Provides the `connmux` binary for checking which commands may be sent
//! over a shared connection and for stress-testing reply ordering.

pub mod commands;
pub mod echo;
pub mod output;
