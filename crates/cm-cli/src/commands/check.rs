//! Check command implementation

use anyhow::{bail, Result};

use cm_core::config::MuxConfig;
use cm_core::AdmissionPolicy;

use crate::output::format_admission;

/// Print whether each command may be sent over a multiplexed connection.
///
/// Fails when any of them would be rejected, so scripts can gate on it.
pub fn check_command(config: &MuxConfig, names: &[String]) -> Result<()> {
    let table = config.command_table();
    println!("{}", format_admission(&table, names));

    let rejected: Vec<&str> = names
        .iter()
        .filter(|name| !table.is_multiplexable(name))
        .map(String::as_str)
        .collect();
    if !rejected.is_empty() {
        bail!(
            "{} cannot be multiplexed; use a dedicated connection",
            rejected.join(", ")
        );
    }
    Ok(())
}
