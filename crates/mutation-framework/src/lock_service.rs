//! # Entity Lock Service
//!
//! Facade over [`LockingBehavior`](crate::LockingBehavior) used at the read
//! and write boundary. It turns lock state into pass/fail decisions and
//! domain errors. Every operation detects the locking capability and succeeds
//! trivially for entities that do not carry one.

use crate::clock::Clock;
use crate::entity::TrackedEntity;
use crate::error::MutationError;
use crate::identity::UserId;
use crate::lock::{LockError, LockInfo, LockOutcome};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct EntityLockService {
    clock: Arc<dyn Clock>,
}

impl EntityLockService {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Acquire or refresh the lock for `user`.
    ///
    /// Returns `None` for entities without a lock.
    pub fn lock_if_supported<E: TrackedEntity + ?Sized>(
        &self,
        entity: &E,
        user: UserId,
    ) -> Result<Option<LockOutcome>, MutationError> {
        let Some(lock) = entity.locking_behavior() else {
            return Ok(None);
        };
        let outcome = lock
            .lock(user, self.now())
            .map_err(|err| self.conflict(entity, user, err))?;
        if let LockOutcome::TakenOver {
            previous_holder,
            locked_at,
        } = outcome
        {
            let event = MutationError::LockExpired {
                entity_type: entity.entity_type(),
                id: entity.key(),
                previous_holder,
                locked_at,
                taken_by: user,
            };
            info!(%event, "Expired lock taken over");
        }
        Ok(Some(outcome))
    }

    /// Release the lock held by `user`.
    ///
    /// An unset or expired lock is released without complaint; a live lock
    /// held by someone else is a conflict.
    pub fn unlock_if_supported<E: TrackedEntity + ?Sized>(
        &self,
        entity: &E,
        user: UserId,
    ) -> Result<(), MutationError> {
        let Some(lock) = entity.locking_behavior() else {
            return Ok(());
        };
        lock.unlock_or_err(user, self.now())
            .map_err(|err| self.conflict(entity, user, err))
    }

    /// Gate for writes. Fails when another user holds a live lock; otherwise
    /// claims or refreshes the lock for `user`.
    pub fn validate_lock_for_update<E: TrackedEntity + ?Sized>(
        &self,
        entity: &E,
        user: UserId,
    ) -> Result<(), MutationError> {
        self.lock_if_supported(entity, user).map(|_| ())
    }

    /// Extend the lock if `user` holds it. Never acquires.
    pub fn refresh_lock_if_owned<E: TrackedEntity + ?Sized>(&self, entity: &E, user: UserId) -> bool {
        entity
            .locking_behavior()
            .is_some_and(|lock| lock.refresh(user, self.now()))
    }

    pub fn is_locked_by_another_user<E: TrackedEntity + ?Sized>(
        &self,
        entity: &E,
        user: UserId,
    ) -> bool {
        entity
            .locking_behavior()
            .is_some_and(|lock| lock.is_locked_by_another(user, self.now()))
    }

    /// Administrative release without an ownership check. Returns whether a
    /// lock was cleared.
    pub fn force_unlock_if_supported<E: TrackedEntity + ?Sized>(
        &self,
        entity: &E,
        user: UserId,
    ) -> bool {
        let Some(lock) = entity.locking_behavior() else {
            return false;
        };
        let previous = lock.snapshot();
        let cleared = lock.force_unlock();
        if cleared {
            warn!(
                entity_type = entity.entity_type(),
                id = %entity.key(),
                by = %user,
                previous_holder = ?previous.holder_id(),
                "Lock forcibly released"
            );
        }
        cleared
    }

    pub fn lock_status<E: TrackedEntity + ?Sized>(&self, entity: &E) -> Option<LockInfo> {
        entity.locking_behavior().map(|lock| lock.snapshot())
    }

    fn conflict<E: TrackedEntity + ?Sized>(
        &self,
        entity: &E,
        user: UserId,
        err: LockError,
    ) -> MutationError {
        let entity_type = entity.entity_type();
        let id = entity.key();
        match err {
            LockError::Held {
                holder_id,
                locked_at,
            } => {
                warn!(entity_type, %id, holder = %holder_id, requested_by = %user, "Lock conflict");
                MutationError::LockConflict {
                    entity_type,
                    id,
                    holder_id,
                    locked_at,
                }
            }
            other => MutationError::Lock(other),
        }
    }
}
