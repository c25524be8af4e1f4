//! # Unit-of-Work Processors
//!
//! Ordered hooks the unit of work runs around the physical write:
//!
//! - `before_save` runs before the write; whatever it changes is part of the
//!   same write.
//! - `after_save` runs only after a durable write: immediately when no
//!   explicit transaction is active, otherwise after a successful commit.
//! - `on_rollback` runs when an explicit transaction is rolled back, in place
//!   of `after_save`.
//!
//! A failing hook aborts the surrounding save or commit. The built-in order
//! is [`AuditProcessor`] then [`LockReleaseProcessor`].

use crate::entity::TrackedEntity;
use crate::error::MutationError;
use crate::identity::UserId;
use crate::tracker::{ChangeTracker, EntityEntry, EntryState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// What a processor sees: the acting user, the save timestamp and the
/// tracked entities.
pub struct ProcessorContext<'a> {
    pub user: UserId,
    pub now: DateTime<Utc>,
    tracker: &'a mut ChangeTracker,
}

impl<'a> ProcessorContext<'a> {
    pub fn new(user: UserId, now: DateTime<Utc>, tracker: &'a mut ChangeTracker) -> Self {
        Self { user, now, tracker }
    }

    pub fn entries(&self) -> impl Iterator<Item = &EntityEntry> {
        self.tracker.entries()
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut EntityEntry> {
        self.tracker.entries_mut()
    }

    pub fn find_mut(&mut self, entity_type: &str, key: &str) -> Option<&mut EntityEntry> {
        self.tracker.find_mut(entity_type, key)
    }
}

#[async_trait]
pub trait UnitOfWorkProcessor: Send + Sync {
    /// Name used in logs and in [`MutationError::Processor`].
    fn name(&self) -> &'static str;

    async fn before_save(&self, _ctx: &mut ProcessorContext<'_>) -> Result<(), MutationError> {
        Ok(())
    }

    async fn after_save(&self, _ctx: &mut ProcessorContext<'_>) -> Result<(), MutationError> {
        Ok(())
    }

    async fn on_rollback(&self) {}
}

/// Stamps audit metadata on every auditable entity about to be written.
#[derive(Debug, Default)]
pub struct AuditProcessor;

#[async_trait]
impl UnitOfWorkProcessor for AuditProcessor {
    fn name(&self) -> &'static str {
        "audit"
    }

    async fn before_save(&self, ctx: &mut ProcessorContext<'_>) -> Result<(), MutationError> {
        let (user, now) = (ctx.user, ctx.now);
        for entry in ctx.entries() {
            let Some(audit) = entry.entity().auditing_behavior() else {
                continue;
            };
            match entry.state() {
                // Not yet durable, so an earlier failed attempt is restamped.
                EntryState::Added => audit.mark_created(user, now),
                EntryState::Modified => audit.mark_modified(user, now),
                EntryState::Unchanged | EntryState::Deleted => {}
            }
        }
        Ok(())
    }
}

/// A lock to release once the current unit of work has durably saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRelease {
    pub entity_type: &'static str,
    pub key: String,
    pub user: UserId,
}

/// Releases scheduled locks after a successful save.
///
/// Releasing before the write would drop the lock even when the write fails,
/// so releases wait for `after_save`. A rollback discards them.
#[derive(Debug, Default)]
pub struct LockReleaseProcessor {
    pending: Mutex<Vec<PendingRelease>>,
}

impl LockReleaseProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&self, entity: &dyn TrackedEntity, user: UserId) {
        if entity.locking_behavior().is_none() {
            return;
        }
        let release = PendingRelease {
            entity_type: entity.entity_type(),
            key: entity.key(),
            user,
        };
        let mut pending = self.pending.lock();
        if !pending.contains(&release) {
            pending.push(release);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[async_trait]
impl UnitOfWorkProcessor for LockReleaseProcessor {
    fn name(&self) -> &'static str {
        "lock-release"
    }

    async fn after_save(&self, ctx: &mut ProcessorContext<'_>) -> Result<(), MutationError> {
        let releases = std::mem::take(&mut *self.pending.lock());
        let now = ctx.now;
        for release in releases {
            let Some(entry) = ctx.find_mut(release.entity_type, &release.key) else {
                debug!(
                    entity_type = release.entity_type,
                    id = %release.key,
                    "Entity no longer tracked; nothing to release"
                );
                continue;
            };
            let Some(lock) = entry.entity().locking_behavior() else {
                continue;
            };
            let was_set = lock.snapshot().is_set();
            if !lock.unlock(release.user, now) {
                warn!(
                    entity_type = release.entity_type,
                    id = %release.key,
                    user = %release.user,
                    "Lock held by another user; not released"
                );
                continue;
            }
            if was_set {
                entry.mark_modified();
                debug!(
                    entity_type = release.entity_type,
                    id = %release.key,
                    "Lock released"
                );
            }
        }
        Ok(())
    }

    async fn on_rollback(&self) {
        let discarded = std::mem::take(&mut *self.pending.lock());
        if !discarded.is_empty() {
            debug!(count = discarded.len(), "Discarded pending lock releases");
        }
    }
}
