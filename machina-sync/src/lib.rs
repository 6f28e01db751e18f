//! # machina-sync
//!
//! The store side of the publish bus.
//!
//! [`store`] persists the attribute hash as JSON; [`Synchronizer`] applies
//! each [`machina_core::ChangeEvent`] to it as a "set field" or "delete field"
//! operation and flushes the result to disk.

pub mod error;
pub mod store;
pub mod synchronizer;

pub use error::StoreError;
pub use store::{AttributeHash, HashFile};
pub use synchronizer::{Applied, Synchronizer};
