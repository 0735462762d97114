//! CLI command implementations

mod check;
mod config;
mod stress;

pub use check::check_command;
pub use config::{config_init, config_show, load_or_default};
pub use stress::{stress_command, StressOptions, StressReport};
