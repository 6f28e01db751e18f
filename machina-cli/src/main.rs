//! machina: attribute bus agent CLI.
//!
//! # Usage
//!
//! ```text
//! machina start|restart [--machine NAME] [--hash NAME] [--uptime-interval SECS]
//! machina stop
//! machina status
//! machina get KEY
//! machina set KEY VALUE
//! machina del KEY
//! machina dump [--json]
//! machina commands [--all]
//! machina complete PREFIX
//! machina logs [NAME] [--lines N]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    attrs::{DelArgs, DumpArgs, GetArgs, SetArgs},
    daemons::{DaemonRunArgs, LifecycleArgs},
    listing::{CommandsArgs, CompleteArgs},
    logs::LogsArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "machina",
    version,
    about = "Run and query the machina attribute daemons",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start every daemon.
    Start(LifecycleArgs),

    /// Stop every running daemon.
    Stop(LifecycleArgs),

    /// Stop, then start every daemon.
    Restart(LifecycleArgs),

    /// Show machined status.
    Status,

    /// Print the value of an attribute.
    Get(GetArgs),

    /// Assign an attribute through its provider.
    Set(SetArgs),

    /// Delete an attribute through its provider.
    Del(DelArgs),

    /// Print every attribute.
    Dump(DumpArgs),

    /// List registered commands.
    Commands(CommandsArgs),

    /// Complete an interactive command name.
    Complete(CompleteArgs),

    /// Print recent daemon log lines.
    Logs(LogsArgs),

    #[command(hide = true)]
    DaemonRun(DaemonRunArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Start(args) => args.start(),
        Commands::Stop(args) => args.stop(),
        Commands::Restart(args) => args.restart(),
        Commands::Status => commands::daemons::status(),
        Commands::Get(args) => args.run(),
        Commands::Set(args) => args.run(),
        Commands::Del(args) => args.run(),
        Commands::Dump(args) => args.run(),
        Commands::Commands(args) => args.run(),
        Commands::Complete(args) => args.run(),
        Commands::Logs(args) => args.run(),
        Commands::DaemonRun(args) => args.run(),
    }
}
