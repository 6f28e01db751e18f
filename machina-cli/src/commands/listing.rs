//! `machina commands` and `machina complete`.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use super::command_table;

#[derive(Args, Debug)]
pub struct CommandsArgs {
    /// Include daemons and hidden commands.
    #[arg(long)]
    pub all: bool,
}

#[derive(Tabled)]
struct CommandRow {
    #[tabled(rename = "command")]
    name: String,
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "usage")]
    usage: String,
    #[tabled(rename = "description")]
    apropos: String,
}

impl CommandsArgs {
    pub fn run(self) -> Result<()> {
        let table = command_table()?;
        let rows: Vec<_> = table
            .iter()
            .filter(|c| self.all || c.kind.is_interactive())
            .map(|c| CommandRow {
                name: c.name.clone(),
                kind: if c.kind.is_interactive() {
                    c.kind.to_string()
                } else {
                    c.kind.to_string().dimmed().to_string()
                },
                usage: c.usage.clone(),
                apropos: c.apropos.clone().unwrap_or_default(),
            })
            .collect();
        let mut rendered = Table::new(rows);
        rendered.with(Style::rounded());
        println!("{rendered}");
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct CompleteArgs {
    /// Leading characters of a command name.
    #[arg(default_value = "")]
    pub prefix: String,
}

impl CompleteArgs {
    pub fn run(self) -> Result<()> {
        for name in command_table()?.complete(&self.prefix) {
            println!("{name}");
        }
        Ok(())
    }
}
