//! Machina core library: attribute and command domain types, configuration.
//!
//! - [`types`]: [`Key`] and [`ChangeEvent`], the unit carried on the bus
//! - [`kind`]: the [`Kind`] execution-policy bitset
//! - [`command`]: [`CommandDescriptor`] and the name-indexed [`CommandTable`]
//! - [`config`]: [`AgentConfig`] load / save and `~/.machina` paths
//! - [`error`]: [`ConfigError`], [`CommandError`], [`EventParseError`]

pub mod command;
pub mod config;
pub mod error;
pub mod kind;
pub mod types;

pub use command::{CommandDescriptor, CommandTable};
pub use config::{AgentConfig, AttrTable};
pub use error::{CommandError, ConfigError, EventParseError};
pub use kind::{classify, Kind, Kinded};
pub use types::{ChangeEvent, Key};
