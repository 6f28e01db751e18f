//! Command descriptors and the name-indexed command table.
//!
//! The table is pure metadata: it never runs anything. The dispatcher
//! (the `machina` binary) and the lifecycle layer consult it to decide what
//! to fork, what to start as a daemon and what to show in listings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CommandError;
use crate::kind::{Kind, Kinded};

/// Metadata describing one registered command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub name: String,
    pub usage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apropos: Option<String>,
    #[serde(default)]
    pub kind: Kind,
    /// Daemon start level; lower levels start first and stop last.
    #[serde(default)]
    pub level: i32,
}

impl CommandDescriptor {
    pub fn new(name: impl Into<String>, usage: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            usage: usage.into(),
            apropos: None,
            kind: Kind::empty(),
            level: 0,
        }
    }

    pub fn with_apropos(mut self, text: impl Into<String>) -> Self {
        self.apropos = Some(text.into());
        self
    }

    pub fn with_kind(mut self, kind: Kind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }
}

impl Kinded for CommandDescriptor {
    fn kind(&self) -> Option<Kind> {
        Some(self.kind)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    by_name: BTreeMap<String, CommandDescriptor>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a command. Names are unique.
    pub fn plot(&mut self, descriptor: CommandDescriptor) -> Result<(), CommandError> {
        if self.by_name.contains_key(&descriptor.name) {
            return Err(CommandError::DuplicateCommand(descriptor.name));
        }
        self.by_name.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    pub fn find(&self, name: &str) -> Result<&CommandDescriptor, CommandError> {
        self.by_name
            .get(name)
            .ok_or_else(|| CommandError::CommandNotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// All commands, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = &CommandDescriptor> {
        self.by_name.values()
    }

    /// Daemon commands in start order: ascending level, then name.
    pub fn daemons(&self) -> Vec<&CommandDescriptor> {
        let mut daemons: Vec<_> = self.iter().filter(|c| c.kind.is_daemon()).collect();
        daemons.sort_by(|a, b| a.level.cmp(&b.level).then_with(|| a.name.cmp(&b.name)));
        daemons
    }

    /// Commands shown in interactive listings.
    pub fn interactive(&self) -> Vec<&CommandDescriptor> {
        self.iter().filter(|c| c.kind.is_interactive()).collect()
    }

    /// Sorted names of interactive commands starting with `prefix`.
    pub fn complete(&self, prefix: &str) -> Vec<String> {
        self.iter()
            .filter(|c| c.kind.is_interactive() && c.name.starts_with(prefix))
            .map(|c| c.name.clone())
            .collect()
    }
}
