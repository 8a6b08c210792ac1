//! Terminal gating for commands that hand stdin and stdout to a child process.

use std::io::{self, IsTerminal};

use compose_flow::{Error, Result};

fn attached() -> bool {
    io::stdin().is_terminal() && io::stdout().is_terminal()
}

/// `command` opens `$EDITOR` in the foreground, which needs a terminal unless
/// the run only prints what it would execute.
pub fn require_terminal(command: &str, dry_run: bool) -> Result<()> {
    check_terminal(command, dry_run, attached())
}

fn check_terminal(command: &str, dry_run: bool, attached: bool) -> Result<()> {
    if attached || dry_run {
        return Ok(());
    }
    Err(Error::validation_invalid_argument(
        "tty",
        format!("{} opens an editor and needs an interactive terminal", command),
        Some(command.to_string()),
        None,
    )
    .with_hint("Re-run with --dry-run to print the editor command instead"))
}
