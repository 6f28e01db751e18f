//! `machina get|set|del|dump`: attribute access through machined.

use anyhow::{bail, Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use machina_daemon::{request_del, request_dump, request_get, request_set};

use super::{client_error, home};

#[derive(Args, Debug)]
pub struct GetArgs {
    pub key: String,
}

impl GetArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        match request_get(&home, &self.key).map_err(|e| client_error(e, "get failed"))? {
            Some(value) => {
                println!("{value}");
                Ok(())
            }
            None => bail!("{}: not set", self.key),
        }
    }
}

#[derive(Args, Debug)]
pub struct SetArgs {
    pub key: String,
    pub value: String,
}

impl SetArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        request_set(&home, &self.key, &self.value).map_err(|e| client_error(e, "set failed"))
    }
}

#[derive(Args, Debug)]
pub struct DelArgs {
    pub key: String,
}

impl DelArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        request_del(&home, &self.key).map_err(|e| client_error(e, "del failed"))
    }
}

#[derive(Args, Debug)]
pub struct DumpArgs {
    /// Emit a JSON object instead of a table.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct AttributeRow {
    #[tabled(rename = "key")]
    key: String,
    #[tabled(rename = "value")]
    value: String,
}

impl DumpArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let attributes = request_dump(&home).map_err(|e| client_error(e, "dump failed"))?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&attributes).context("failed to render JSON")?
            );
            return Ok(());
        }
        if attributes.is_empty() {
            println!("no attributes");
            return Ok(());
        }
        let rows: Vec<_> = attributes
            .into_iter()
            .map(|(key, value)| AttributeRow { key, value })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
