//! # Pessimistic Locking
//!
//! [`LockInfo`] is the persisted lock value (holder, timestamp, timeout) with
//! the pure predicates `expired`, `held` and `held by`. [`LockingBehavior`] is
//! the per-entity state machine built on top of it:
//!
//! ```text
//! Unlocked ──lock(u)──▶ Locked(u, t) ──timeout──▶ Expired ──lock(v)──▶ Locked(v, t')
//!     ▲                     │                        │
//!     └──unlock(u) / force──┘◀───────unlock(any)─────┘
//! ```
//!
//! Every transition and every snapshot read happens under the behavior's own
//! mutex. Acquisition never waits: a lock held by someone else fails fast with
//! [`LockError::Held`].
//!
//! The lock is advisory and process-local. Two separately loaded copies of the
//! same row do not share this state; they agree only through the persisted
//! lock columns and the row version.

use crate::identity::UserId;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Lock timeout used when none is configured.
pub const DEFAULT_LOCK_TIMEOUT_MINUTES: i64 = 15;

/// Shortest accepted lock timeout, in minutes.
pub const MIN_LOCK_TIMEOUT_MINUTES: i64 = 1;

/// Longest accepted lock timeout, in minutes (4 hours).
pub const MAX_LOCK_TIMEOUT_MINUTES: i64 = 240;

/// Behavior-level lock failures.
///
/// The lock service lifts [`LockError::Held`] into
/// [`MutationError::LockConflict`](crate::MutationError::LockConflict) once the
/// entity type is known.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("locked by {holder_id} since {locked_at}")]
    Held {
        holder_id: UserId,
        locked_at: DateTime<Utc>,
    },
    #[error("locked_by_user_id and locked_at_utc must be set together")]
    InconsistentColumns,
    #[error("lock timeout must be between 1 and 240 minutes, got {0}")]
    TimeoutOutOfRange(i64),
}

/// Reject timeouts outside `MIN_LOCK_TIMEOUT_MINUTES..=MAX_LOCK_TIMEOUT_MINUTES`.
pub fn check_timeout_minutes(minutes: i64) -> Result<i64, LockError> {
    if (MIN_LOCK_TIMEOUT_MINUTES..=MAX_LOCK_TIMEOUT_MINUTES).contains(&minutes) {
        Ok(minutes)
    } else {
        Err(LockError::TimeoutOutOfRange(minutes))
    }
}

/// Persisted lock value.
///
/// Invariants: holder and timestamp are either both set or both unset, and
/// the timeout lies within the accepted range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LockColumns", into = "LockColumns")]
pub struct LockInfo {
    holder_id: Option<UserId>,
    locked_at: Option<DateTime<Utc>>,
    timeout_minutes: i64,
}

/// Column layout of a lock.
#[derive(Serialize, Deserialize)]
struct LockColumns {
    locked_by_user_id: Option<UserId>,
    locked_at_utc: Option<DateTime<Utc>>,
    #[serde(default = "default_timeout_minutes")]
    lock_timeout_minutes: i64,
}

fn default_timeout_minutes() -> i64 {
    DEFAULT_LOCK_TIMEOUT_MINUTES
}

impl TryFrom<LockColumns> for LockInfo {
    type Error = LockError;

    fn try_from(columns: LockColumns) -> Result<Self, Self::Error> {
        if columns.locked_by_user_id.is_some() != columns.locked_at_utc.is_some() {
            return Err(LockError::InconsistentColumns);
        }
        Ok(Self {
            holder_id: columns.locked_by_user_id,
            locked_at: columns.locked_at_utc,
            timeout_minutes: check_timeout_minutes(columns.lock_timeout_minutes)?,
        })
    }
}

impl From<LockInfo> for LockColumns {
    fn from(info: LockInfo) -> Self {
        Self {
            locked_by_user_id: info.holder_id,
            locked_at_utc: info.locked_at,
            lock_timeout_minutes: info.timeout_minutes,
        }
    }
}

impl Default for LockInfo {
    fn default() -> Self {
        Self {
            holder_id: None,
            locked_at: None,
            timeout_minutes: DEFAULT_LOCK_TIMEOUT_MINUTES,
        }
    }
}

impl LockInfo {
    pub fn unlocked(timeout_minutes: i64) -> Result<Self, LockError> {
        Ok(Self {
            holder_id: None,
            locked_at: None,
            timeout_minutes: check_timeout_minutes(timeout_minutes)?,
        })
    }

    pub fn locked(
        holder_id: UserId,
        locked_at: DateTime<Utc>,
        timeout_minutes: i64,
    ) -> Result<Self, LockError> {
        Ok(Self {
            holder_id: Some(holder_id),
            locked_at: Some(locked_at),
            timeout_minutes: check_timeout_minutes(timeout_minutes)?,
        })
    }

    pub fn holder_id(&self) -> Option<UserId> {
        self.holder_id
    }

    pub fn locked_at(&self) -> Option<DateTime<Utc>> {
        self.locked_at
    }

    pub fn timeout(&self) -> Duration {
        Duration::minutes(self.timeout_minutes)
    }

    pub fn timeout_minutes(&self) -> i64 {
        self.timeout_minutes
    }

    pub fn is_set(&self) -> bool {
        self.holder_id.is_some()
    }

    /// `None` when unset, or when the expiry falls past the representable range.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let timeout = Duration::try_minutes(self.timeout_minutes)?;
        self.locked_at?.checked_add_signed(timeout)
    }

    /// `now > locked_at + timeout`. An unset lock is not expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires| now > expires)
    }

    /// Set and not expired.
    pub fn is_held(&self, now: DateTime<Utc>) -> bool {
        self.is_set() && !self.is_expired(now)
    }

    pub fn is_held_by(&self, user: UserId, now: DateTime<Utc>) -> bool {
        self.is_held(now) && self.holder_id == Some(user)
    }

    fn set(&mut self, user: UserId, now: DateTime<Utc>) {
        self.holder_id = Some(user);
        self.locked_at = Some(now);
    }

    fn clear(&mut self) {
        self.holder_id = None;
        self.locked_at = None;
    }

    fn held_error(&self) -> LockError {
        match (self.holder_id, self.locked_at) {
            (Some(holder_id), Some(locked_at)) => LockError::Held {
                holder_id,
                locked_at,
            },
            _ => LockError::InconsistentColumns,
        }
    }
}

/// Result of a successful [`LockingBehavior::lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// The lock was free.
    Acquired,
    /// The caller already held it; the timestamp moved to now.
    Refreshed,
    /// Another user's lock had expired and now belongs to the caller.
    TakenOver {
        previous_holder: UserId,
        locked_at: DateTime<Utc>,
    },
}

/// Capability contract for entities that can be pessimistically locked.
pub trait Lockable {
    fn locking(&self) -> &LockingBehavior;
}

/// Thread-safe lock state attached to one entity instance.
///
/// Persists as the `locked_by_user_id`, `locked_at_utc` and
/// `lock_timeout_minutes` columns of the owning row; flatten it into the
/// entity with `#[serde(flatten)]`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(from = "LockInfo", into = "LockInfo")]
pub struct LockingBehavior {
    state: Mutex<LockInfo>,
}

impl Clone for LockingBehavior {
    fn clone(&self) -> Self {
        Self::from(self.snapshot())
    }
}

impl From<LockInfo> for LockingBehavior {
    fn from(info: LockInfo) -> Self {
        Self {
            state: Mutex::new(info),
        }
    }
}

impl From<LockingBehavior> for LockInfo {
    fn from(behavior: LockingBehavior) -> Self {
        behavior.state.into_inner()
    }
}

impl LockingBehavior {
    pub fn with_timeout_minutes(timeout_minutes: i64) -> Result<Self, LockError> {
        LockInfo::unlocked(timeout_minutes).map(Self::from)
    }

    /// Consistent copy of the current lock value.
    pub fn snapshot(&self) -> LockInfo {
        self.state.lock().clone()
    }

    /// Acquire or refresh the lock for `user`.
    ///
    /// Re-locking by the current holder refreshes the timestamp. An expired or
    /// unset lock is claimed. A live lock held by someone else fails.
    pub fn lock(&self, user: UserId, now: DateTime<Utc>) -> Result<LockOutcome, LockError> {
        let mut state = self.state.lock();
        if state.is_held_by(user, now) {
            state.locked_at = Some(now);
            return Ok(LockOutcome::Refreshed);
        }
        if state.is_held(now) {
            return Err(state.held_error());
        }

        let outcome = match (state.holder_id, state.locked_at) {
            (Some(previous_holder), Some(locked_at)) if previous_holder != user => {
                LockOutcome::TakenOver {
                    previous_holder,
                    locked_at,
                }
            }
            _ => LockOutcome::Acquired,
        };
        state.set(user, now);
        Ok(outcome)
    }

    /// Release the lock if `user` holds it or it has expired.
    ///
    /// Returns `true` when the lock is free afterwards (including when it was
    /// never set) and `false` when a live lock belongs to someone else.
    pub fn unlock(&self, user: UserId, now: DateTime<Utc>) -> bool {
        self.unlock_or_err(user, now).is_ok()
    }

    /// Same rule as [`unlock`](Self::unlock), failing instead of returning `false`.
    pub fn unlock_or_err(&self, user: UserId, now: DateTime<Utc>) -> Result<(), LockError> {
        let mut state = self.state.lock();
        if !state.is_set() {
            return Ok(());
        }
        if state.is_held_by(user, now) || state.is_expired(now) {
            state.clear();
            return Ok(());
        }
        Err(state.held_error())
    }

    /// Clear the lock without an ownership check. Returns whether a lock was set.
    pub fn force_unlock(&self) -> bool {
        let mut state = self.state.lock();
        let was_set = state.is_set();
        state.clear();
        was_set
    }

    /// Move the timestamp to now if `user` holds the lock. Never acquires.
    pub fn refresh(&self, user: UserId, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        if state.is_held_by(user, now) {
            state.locked_at = Some(now);
            true
        } else {
            false
        }
    }

    pub fn is_locked_by_another(&self, user: UserId, now: DateTime<Utc>) -> bool {
        let state = self.state.lock();
        state.is_held(now) && state.holder_id != Some(user)
    }
}
