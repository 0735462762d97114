//! cm-core: Core abstractions and configuration for connmux
//!
//! This crate provides the command and reply types, the connection trait
//! consumed by the multiplexer, the command admission table, and the
//! configuration structures shared by the multiplexer and the CLI.

pub mod command;
pub mod config;
pub mod error;
pub mod line;
pub mod reply;
pub mod traits;

pub use command::{AdmissionPolicy, Command, CommandInfo, CommandTable, ConnState};
pub use error::{ConfigError, ConnectionError};
pub use line::LineConnection;
pub use reply::Reply;
pub use traits::Connection;
