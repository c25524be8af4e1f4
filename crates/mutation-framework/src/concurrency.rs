//! # Optimistic Concurrency
//!
//! A [`ConcurrencyToken`] is the row version owned by the store. Entities carry
//! the token they were loaded with; the store rejects any update or delete
//! whose token no longer matches, and issues a fresh token on every successful
//! write.

use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Opaque row version stamp, persisted as the `row_version` column.
///
/// The default token (`0`) marks an entity that has never been written.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ConcurrencyToken(pub u64);

impl ConcurrencyToken {
    pub fn is_unsaved(&self) -> bool {
        self.0 == 0
    }
}

impl Display for ConcurrencyToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Capability contract for entities that take part in optimistic concurrency.
pub trait Versioned {
    fn row_version(&self) -> ConcurrencyToken;

    /// Called by the unit of work after a successful write.
    fn set_row_version(&mut self, version: ConcurrencyToken);
}
