//! Subcommand implementations and the table describing them.

pub mod attrs;
pub mod daemons;
pub mod listing;
pub mod logs;

use std::path::PathBuf;

use anyhow::{Context, Result};
use machina_core::{CommandDescriptor, CommandTable, Kind};
use machina_daemon::paths::MACHINED;
use machina_daemon::{DaemonError, DAEMON_RUN};

/// Every command `machina` knows, including the daemons it runs.
pub fn command_table() -> Result<CommandTable> {
    let mut table = CommandTable::new();
    for descriptor in [
        CommandDescriptor::new("start", "start [MACHINED-OPTIONS]...")
            .with_apropos("start every daemon"),
        CommandDescriptor::new("stop", "stop").with_apropos("stop every daemon"),
        CommandDescriptor::new("restart", "restart [MACHINED-OPTIONS]...")
            .with_apropos("stop, then start every daemon"),
        CommandDescriptor::new("status", "status").with_apropos("show machined status"),
        CommandDescriptor::new("get", "get KEY").with_apropos("print an attribute"),
        CommandDescriptor::new("set", "set KEY VALUE").with_apropos("assign an attribute"),
        CommandDescriptor::new("del", "del KEY").with_apropos("delete an attribute"),
        CommandDescriptor::new("dump", "dump [--json]").with_apropos("print every attribute"),
        CommandDescriptor::new("commands", "commands [--all]")
            .with_apropos("list registered commands"),
        CommandDescriptor::new("complete", "complete PREFIX")
            .with_apropos("complete a command name"),
        CommandDescriptor::new("logs", "logs [NAME] [--lines N]")
            .with_apropos("print recent daemon log lines")
            .with_kind(Kind::CANT_PIPE),
        CommandDescriptor::new(MACHINED, MACHINED)
            .with_apropos("attribute bus daemon")
            .with_kind(Kind::DAEMON),
        CommandDescriptor::new(DAEMON_RUN, "daemon-run NAME [ARGS]...")
            .with_apropos("run a daemon in the foreground")
            .with_kind(Kind::HIDDEN | Kind::DONT_FORK),
    ] {
        table.plot(descriptor).context("building command table")?;
    }
    Ok(table)
}

pub fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// "not running" is reported as is; anything else gets `context`.
pub fn client_error(err: DaemonError, context: &'static str) -> anyhow::Error {
    match err {
        err @ DaemonError::DaemonNotRunning { .. } => anyhow::Error::new(err),
        err => anyhow::Error::new(err).context(context),
    }
}
