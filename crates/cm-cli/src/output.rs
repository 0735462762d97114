//! Output formatting utilities for the CLI

use tabled::{settings::Style, Table, Tabled};

use cm_core::{AdmissionPolicy, CommandInfo, CommandTable, ConnState};

/// Format admission decisions for a list of command names as a table
pub fn format_admission(table: &CommandTable, names: &[String]) -> String {
    #[derive(Tabled)]
    struct AdmissionRow {
        #[tabled(rename = "COMMAND")]
        command: String,
        #[tabled(rename = "DECISION")]
        decision: &'static str,
        #[tabled(rename = "SETS")]
        sets: String,
        #[tabled(rename = "CLEARS")]
        clears: String,
    }

    let rows: Vec<AdmissionRow> = names
        .iter()
        .map(|name| {
            let info = CommandInfo::lookup(name);
            AdmissionRow {
                command: name.to_ascii_uppercase(),
                decision: if table.is_multiplexable(name) {
                    "admitted"
                } else {
                    "rejected"
                },
                sets: describe_states(|s| info.set.contains(s)),
                clears: describe_states(|s| info.clear.contains(s)),
            }
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

fn describe_states(contains: impl Fn(ConnState) -> bool) -> String {
    let names: Vec<&str> = [
        (ConnState::Watch, "watch"),
        (ConnState::Multi, "multi"),
        (ConnState::Subscribe, "subscribe"),
        (ConnState::Monitor, "monitor"),
    ]
    .into_iter()
    .filter(|(state, _)| contains(*state))
    .map(|(_, name)| name)
    .collect();

    if names.is_empty() {
        "-".to_string()
    } else {
        names.join(",")
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red to stderr
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_admission() {
        let table = CommandTable::new();
        let out = format_admission(&table, &["get".to_string(), "exec".to_string(), "watch".to_string()]);
        assert!(out.contains("GET"));
        assert!(out.contains("admitted"));
        assert!(out.contains("rejected"));
        assert!(out.contains("watch,multi"));
    }

    #[test]
    fn test_describe_states_empty() {
        assert_eq!(describe_states(|_| false), "-");
    }
}
