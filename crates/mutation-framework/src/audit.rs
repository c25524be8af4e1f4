//! # Auditing
//!
//! Creation and last-modification stamps. The audit processor stamps every
//! auditable entity the unit of work is about to persist; application code
//! only reads these values.

use crate::identity::UserId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Persisted audit columns.
///
/// `created_*` never change once the row has been inserted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditInfo {
    pub created_by_user_id: Option<UserId>,
    pub created_at_utc: Option<DateTime<Utc>>,
    pub modified_by_user_id: Option<UserId>,
    pub modified_at_utc: Option<DateTime<Utc>>,
}

impl AuditInfo {
    pub fn is_created(&self) -> bool {
        self.created_at_utc.is_some()
    }
}

/// Capability contract for entities that carry audit stamps.
pub trait Auditable {
    fn auditing(&self) -> &AuditingBehavior;
}

/// Thread-safe audit state attached to one entity instance.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(from = "AuditInfo", into = "AuditInfo")]
pub struct AuditingBehavior {
    state: Mutex<AuditInfo>,
}

impl Clone for AuditingBehavior {
    fn clone(&self) -> Self {
        Self::from(self.snapshot())
    }
}

impl From<AuditInfo> for AuditingBehavior {
    fn from(info: AuditInfo) -> Self {
        Self {
            state: Mutex::new(info),
        }
    }
}

impl From<AuditingBehavior> for AuditInfo {
    fn from(behavior: AuditingBehavior) -> Self {
        behavior.state.into_inner()
    }
}

impl AuditingBehavior {
    pub fn snapshot(&self) -> AuditInfo {
        self.state.lock().clone()
    }

    /// Stamp creation for a pending insert. Stamps left by an earlier failed
    /// attempt are overwritten and the modification stamps cleared.
    pub fn mark_created(&self, user: UserId, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.created_by_user_id = Some(user);
        state.created_at_utc = Some(now);
        state.modified_by_user_id = None;
        state.modified_at_utc = None;
    }

    /// Stamp modification. Creation stamps are untouched.
    pub fn mark_modified(&self, user: UserId, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.modified_by_user_id = Some(user);
        state.modified_at_utc = Some(now);
    }
}
