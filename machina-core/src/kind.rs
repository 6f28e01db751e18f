//! Command kind flags.
//!
//! A [`Kind`] is a small bitset describing how a command is executed:
//! whether it may be forked, runs as a background daemon, is hidden from
//! interactive listings, or refuses to take part in a pipeline.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kind(u16);

impl Kind {
    /// Run inline in the caller's process.
    pub const DONT_FORK: Kind = Kind(1 << 0);
    /// Run detached as a background daemon.
    pub const DAEMON: Kind = Kind(1 << 1);
    /// Omit from interactive listings and completion.
    pub const HIDDEN: Kind = Kind(1 << 2);
    /// Refuse to be used as a pipeline stage.
    pub const CANT_PIPE: Kind = Kind(1 << 3);

    const NAMED: [(Kind, &'static str); 4] = [
        (Kind::DONT_FORK, "dont-fork"),
        (Kind::DAEMON, "daemon"),
        (Kind::HIDDEN, "hidden"),
        (Kind::CANT_PIPE, "cant-pipe"),
    ];

    /// Interactive, forkable, visible and pipeable.
    pub const fn empty() -> Self {
        Kind(0)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn from_bits(bits: u16) -> Self {
        Kind(bits)
    }

    pub const fn contains(self, other: Kind) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_dont_fork(self) -> bool {
        self.contains(Kind::DONT_FORK)
    }

    pub const fn is_daemon(self) -> bool {
        self.contains(Kind::DAEMON)
    }

    pub const fn is_hidden(self) -> bool {
        self.contains(Kind::HIDDEN)
    }

    pub const fn is_cant_pipe(self) -> bool {
        self.contains(Kind::CANT_PIPE)
    }

    /// A daemon is never interactive, hidden or not.
    pub const fn is_interactive(self) -> bool {
        self.0 & (Kind::DAEMON.0 | Kind::HIDDEN.0) == 0
    }
}

/// Anything that may declare a kind. Commands that don't are interactive.
pub trait Kinded {
    fn kind(&self) -> Option<Kind> {
        None
    }
}

/// Kind of `command`, or the empty kind when it declares none.
pub fn classify<C: Kinded + ?Sized>(command: &C) -> Kind {
    command.kind().unwrap_or_default()
}

impl BitOr for Kind {
    type Output = Kind;

    fn bitor(self, rhs: Kind) -> Kind {
        Kind(self.0 | rhs.0)
    }
}

impl BitOrAssign for Kind {
    fn bitor_assign(&mut self, rhs: Kind) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Kind {
    type Output = Kind;

    fn bitand(self, rhs: Kind) -> Kind {
        Kind(self.0 & rhs.0)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("interactive");
        }
        let mut first = true;
        for (flag, name) in Kind::NAMED {
            if self.contains(flag) {
                if !first {
                    f.write_str(",")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        let unknown = self.0 & !Kind::NAMED.iter().fold(0, |acc, (flag, _)| acc | flag.0);
        if unknown != 0 {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "@{unknown:#x}")?;
        }
        Ok(())
    }
}
