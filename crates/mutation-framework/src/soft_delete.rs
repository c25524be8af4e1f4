//! # Soft Delete
//!
//! Tombstoning instead of row removal. Soft-deleted rows stay in the store
//! and are hidden from default queries.

use crate::identity::UserId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("deleted_at_utc and deleted_by_user_id must be set exactly when is_deleted is true")]
pub struct InconsistentTombstone;

/// Persisted tombstone.
///
/// Invariant: `is_deleted` is true iff both `deleted_at` and `deleted_by` are set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TombstoneColumns", into = "TombstoneColumns")]
pub struct SoftDeleteInfo {
    deleted: Option<(UserId, DateTime<Utc>)>,
}

#[derive(Serialize, Deserialize)]
struct TombstoneColumns {
    #[serde(default)]
    is_deleted: bool,
    deleted_at_utc: Option<DateTime<Utc>>,
    deleted_by_user_id: Option<UserId>,
}

impl TryFrom<TombstoneColumns> for SoftDeleteInfo {
    type Error = InconsistentTombstone;

    fn try_from(columns: TombstoneColumns) -> Result<Self, Self::Error> {
        match (
            columns.is_deleted,
            columns.deleted_by_user_id,
            columns.deleted_at_utc,
        ) {
            (true, Some(user), Some(at)) => Ok(Self {
                deleted: Some((user, at)),
            }),
            (false, None, None) => Ok(Self { deleted: None }),
            _ => Err(InconsistentTombstone),
        }
    }
}

impl From<SoftDeleteInfo> for TombstoneColumns {
    fn from(info: SoftDeleteInfo) -> Self {
        Self {
            is_deleted: info.deleted.is_some(),
            deleted_at_utc: info.deleted_at(),
            deleted_by_user_id: info.deleted_by(),
        }
    }
}

impl SoftDeleteInfo {
    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    pub fn deleted_by(&self) -> Option<UserId> {
        self.deleted.map(|(user, _)| user)
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted.map(|(_, at)| at)
    }
}

/// Capability contract for entities that are tombstoned instead of removed.
pub trait SoftDeletable {
    fn soft_delete(&self) -> &SoftDeleteBehavior;
}

/// Thread-safe tombstone attached to one entity instance.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(from = "SoftDeleteInfo", into = "SoftDeleteInfo")]
pub struct SoftDeleteBehavior {
    state: Mutex<SoftDeleteInfo>,
}

impl Clone for SoftDeleteBehavior {
    fn clone(&self) -> Self {
        Self::from(self.snapshot())
    }
}

impl From<SoftDeleteInfo> for SoftDeleteBehavior {
    fn from(info: SoftDeleteInfo) -> Self {
        Self {
            state: Mutex::new(info),
        }
    }
}

impl From<SoftDeleteBehavior> for SoftDeleteInfo {
    fn from(behavior: SoftDeleteBehavior) -> Self {
        behavior.state.into_inner()
    }
}

impl SoftDeleteBehavior {
    pub fn snapshot(&self) -> SoftDeleteInfo {
        self.state.lock().clone()
    }

    pub fn is_deleted(&self) -> bool {
        self.state.lock().is_deleted()
    }

    /// Tombstone the entity. A second call keeps the first tombstone and
    /// returns `false`.
    pub fn mark_deleted(&self, user: UserId, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        if state.is_deleted() {
            return false;
        }
        state.deleted = Some((user, now));
        true
    }

    /// Clear the tombstone. Returns whether the entity was deleted.
    pub fn restore(&self) -> bool {
        self.state.lock().deleted.take().is_some()
    }
}
