//! Domain types shared by providers, the bus and the store synchronizer.
//!
//! A [`ChangeEvent`] has a single text form that the store side consumes:
//!
//! ```text
//! machine: platina-mk1        (set)
//! delete: cmdline.quiet       (delete)
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EventParseError;

/// Separator between a key and its value in the text form.
pub const SEPARATOR: &str = ": ";

/// Marker used in place of a key to signal removal.
pub const DELETE_MARKER: &str = "delete";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A dot-delimited attribute key such as `machine` or `cmdline.boot`.
///
/// Keys are non-empty, single-line and never contain [`SEPARATOR`]; only
/// such keys survive the text form. `From` conversions are unchecked and
/// meant for literals; use [`Key::new`] for anything read from outside.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(pub String);

impl Key {
    pub fn new(key: impl Into<String>) -> Result<Self, EventParseError> {
        let key = key.into();
        if key.is_empty() {
            return Err(EventParseError::EmptyKey(key));
        }
        if !Self::is_valid(&key) {
            return Err(EventParseError::InvalidKey(key));
        }
        Ok(Self(key))
    }

    pub fn is_valid(key: &str) -> bool {
        !key.is_empty() && !key.contains(SEPARATOR) && !key.contains('\n')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Change events
// ---------------------------------------------------------------------------

/// One change notification carried on the publish bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ChangeEvent {
    /// `key` now holds `value`.
    Set { key: Key, value: String },
    /// `key` no longer exists.
    Delete { key: Key },
}

impl ChangeEvent {
    pub fn set(key: impl Into<Key>, value: impl fmt::Display) -> Self {
        Self::Set {
            key: key.into(),
            value: value.to_string(),
        }
    }

    pub fn delete(key: impl Into<Key>) -> Self {
        Self::Delete { key: key.into() }
    }

    pub fn key(&self) -> &Key {
        match self {
            Self::Set { key, .. } | Self::Delete { key } => key,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete { .. })
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set { key, value } => write!(f, "{key}{SEPARATOR}{value}"),
            Self::Delete { key } => write!(f, "{DELETE_MARKER}{SEPARATOR}{key}"),
        }
    }
}

impl FromStr for ChangeEvent {
    type Err = EventParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((head, tail)) = s.split_once(SEPARATOR) else {
            return Err(EventParseError::MissingSeparator(s.to_string()));
        };
        if head.is_empty() {
            return Err(EventParseError::EmptyKey(s.to_string()));
        }
        if head == DELETE_MARKER {
            if tail.is_empty() {
                return Err(EventParseError::EmptyKey(s.to_string()));
            }
            return Ok(Self::delete(tail));
        }
        Ok(Self::set(head, tail))
    }
}
