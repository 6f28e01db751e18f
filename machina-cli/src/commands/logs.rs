//! `machina logs`: tail daemon log files.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;

use machina_daemon::paths::daemon_log_path;

use super::{command_table, home};

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Daemon whose log to print; every daemon when omitted.
    pub name: Option<String>,

    /// Number of trailing lines to show.
    #[arg(long, default_value_t = 100)]
    pub lines: usize,
}

impl LogsArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let table = command_table()?;
        let names: Vec<String> = match self.name {
            Some(name) => {
                if !table.find(&name)?.kind.is_daemon() {
                    bail!("{name}: not a daemon");
                }
                vec![name]
            }
            None => table.daemons().into_iter().map(|c| c.name.clone()).collect(),
        };
        for name in names {
            print_tail(&daemon_log_path(&home, &name), self.lines)
                .with_context(|| format!("failed to read {name} log"))?;
        }
        Ok(())
    }
}

fn print_tail(path: &Path, lines: usize) -> Result<()> {
    if !path.exists() {
        println!("log file not found: {}", path.display());
        return Ok(());
    }

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut tail = VecDeque::<String>::with_capacity(lines);
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if tail.len() == lines {
            tail.pop_front();
        }
        if lines > 0 {
            tail.push_back(line);
        }
    }

    println!("==> {} <==", path.display());
    for line in tail {
        println!("{line}");
    }
    Ok(())
}
