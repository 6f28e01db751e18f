//! `machina start|stop|restart|status` and the hidden `daemon-run`.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser};
use colored::Colorize;

use machina_core::{config, AgentConfig};
use machina_daemon::paths::{socket_path, MACHINED};
use machina_daemon::{request_status, restart, DaemonControl, DaemonError, DaemonTable, PidFiles};

use super::{command_table, home};

/// `machined` options, checked here and passed through to the daemon.
#[derive(Args, Debug)]
pub struct LifecycleArgs {
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl LifecycleArgs {
    pub fn start(self) -> Result<()> {
        MachinedArgs::parse_args(&self.args)?;
        let mut table = daemon_table()?;
        table.start(&self.args).context("start failed")?;
        println!("{} daemons started", "✓".green());
        Ok(())
    }

    pub fn stop(self) -> Result<()> {
        let mut table = daemon_table()?;
        table.stop(&self.args).context("stop failed")?;
        println!("{} daemons stopped", "✓".green());
        Ok(())
    }

    pub fn restart(self) -> Result<()> {
        // Checked before anything is stopped.
        MachinedArgs::parse_args(&self.args)?;
        let mut table = daemon_table()?;
        restart(&mut table, &self.args).context("restart aborted")?;
        println!("{} daemons restarted", "✓".green());
        Ok(())
    }
}

fn daemon_table() -> Result<DaemonTable> {
    let home = home()?;
    let config = config::load_at(&home).context("failed to load agent configuration")?;
    let commands = command_table()?;
    DaemonTable::new(&home, &config, &commands).context("failed to build daemon table")
}

pub fn status() -> Result<()> {
    let home = home()?;
    let payload = match request_status(&home) {
        Ok(status) => status,
        Err(DaemonError::DaemonNotRunning { .. }) => {
            let config = config::load_at(&home).context("failed to load agent configuration")?;
            let recorded = PidFiles::at(&home, &config)
                .list()
                .context("failed to list pidfiles")?;
            serde_json::json!({
                "running": false,
                "socket": socket_path(&home).display().to_string(),
                "recorded_pids": recorded,
            })
        }
        Err(err) => return Err(err).context("failed to query daemon status"),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to render daemon status JSON")?
    );
    Ok(())
}

/// `machined` options; each one overrides the matching configuration field.
#[derive(Parser, Debug, Default, PartialEq, Eq)]
#[command(name = "machined", no_binary_name = true)]
pub struct MachinedArgs {
    /// Identity published under `machine`.
    #[arg(long)]
    pub machine: Option<String>,

    /// Name of the persistent attribute hash.
    #[arg(long)]
    pub hash: Option<String>,

    /// Uptime poll period.
    #[arg(long = "uptime-interval", value_name = "SECS")]
    pub uptime_interval: Option<u64>,
}

impl MachinedArgs {
    pub fn parse_args(args: &[String]) -> Result<Self> {
        Self::try_parse_from(args).context("invalid machined arguments")
    }

    pub fn apply(self, config: &mut AgentConfig) {
        if let Some(machine) = self.machine {
            config.machine = machine;
        }
        if let Some(hash) = self.hash {
            config.hash = hash;
        }
        if let Some(secs) = self.uptime_interval {
            config.uptime_interval_secs = secs;
        }
    }
}

/// Arguments for the hidden `machina daemon-run`.
#[derive(Args, Debug)]
pub struct DaemonRunArgs {
    /// Daemon command to run.
    pub name: String,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl DaemonRunArgs {
    pub fn run(self) -> Result<()> {
        let table = command_table()?;
        let descriptor = table.find(&self.name)?;
        if !descriptor.kind.is_daemon() {
            bail!("{}: not a daemon", self.name);
        }
        match descriptor.name.as_str() {
            MACHINED => {
                let options = MachinedArgs::parse_args(&self.args)?;
                let home = home()?;
                let mut config =
                    config::load_at(&home).context("failed to load agent configuration")?;
                options.apply(&mut config);
                machina_daemon::start_blocking(&home, config)
                    .context("machined exited with error")
            }
            other => bail!("{other}: no runner for this daemon"),
        }
    }
}
