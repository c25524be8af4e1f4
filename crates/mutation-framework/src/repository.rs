//! # Repository
//!
//! The CRUD boundary for one entity type. A repository holds no state of its
//! own; every operation runs against the [`UnitOfWork`] passed in, reading
//! through its change tracker and staging writes in it. Nothing reaches the
//! store until [`UnitOfWork::save_changes`].
//!
//! Writes (`update`, `remove`, `soft_delete`, `restore`) validate the lock
//! first. A conflict aborts the call before anything is staged.

use crate::entity::{CapabilitySet, Entity, TrackedEntity};
use crate::error::MutationError;
use crate::lock::{LockInfo, LockOutcome};
use crate::lock_service::EntityLockService;
use crate::registry::{CapabilityRegistry, EntityDescriptor};
use crate::tracker::EntryState;
use crate::unit_of_work::UnitOfWork;
use std::marker::PhantomData;
use tracing::debug;

/// Whether a read attaches the result to the unit of work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Tracking {
    #[default]
    Tracked,
    Detached,
}

/// Read options.
///
/// ```rust
/// use mutation_framework::{ReadOptions, Tracking};
///
/// let options = ReadOptions::detached().with_soft_deleted();
/// assert!(options.include_soft_deleted);
/// assert_eq!(options.tracking, Tracking::Detached);
/// assert!(ReadOptions::for_edit().lock_for_edit);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    pub include_soft_deleted: bool,
    pub tracking: Tracking,
    /// Acquire the lock for the acting user. Forces tracking.
    pub lock_for_edit: bool,
}

impl ReadOptions {
    pub fn tracked() -> Self {
        Self::default()
    }

    pub fn detached() -> Self {
        Self {
            tracking: Tracking::Detached,
            ..Self::default()
        }
    }

    pub fn for_edit() -> Self {
        Self {
            lock_for_edit: true,
            ..Self::default()
        }
    }

    pub fn with_soft_deleted(mut self) -> Self {
        self.include_soft_deleted = true;
        self
    }

    fn tracks(&self) -> bool {
        self.tracking == Tracking::Tracked || self.lock_for_edit
    }
}

pub struct Repository<T: Entity> {
    descriptor: EntityDescriptor,
    lock_service: EntityLockService,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor,
            lock_service: self.lock_service.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> std::fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl<T: Entity> Repository<T> {
    /// Fails with [`MutationError::Unregistered`] when `T` is not in the registry.
    pub fn new(
        registry: &CapabilityRegistry,
        lock_service: EntityLockService,
    ) -> Result<Self, MutationError> {
        let descriptor = *registry.require::<T>()?;
        Ok(Self {
            descriptor,
            lock_service,
            _entity: PhantomData,
        })
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.descriptor.capabilities
    }

    pub fn lock_service(&self) -> &EntityLockService {
        &self.lock_service
    }

    // --- Reads ---

    pub async fn get_by_id(
        &self,
        uow: &mut UnitOfWork,
        id: &T::Id,
        options: ReadOptions,
    ) -> Result<Option<T>, MutationError> {
        let cached = uow
            .tracker()
            .get::<T>(id)
            .map(|(entity, state)| (entity.clone(), state));

        let (entity, attached) = match cached {
            Some((_, EntryState::Deleted)) => return Ok(None),
            Some((entity, _)) => (entity, true),
            None => {
                let key = id.to_string();
                let scope = uow.read_scope(options.include_soft_deleted);
                match uow.store().fetch(T::ENTITY_TYPE, &key, scope).await? {
                    Some(row) => (serde_json::from_value::<T>(row.data)?, false),
                    None => return Ok(None),
                }
            }
        };

        if !options.include_soft_deleted && is_soft_deleted(&entity) {
            return Ok(None);
        }

        if options.lock_for_edit {
            let outcome = self.lock_service.lock_if_supported(&entity, uow.user())?;
            let state = if outcome.is_some() {
                EntryState::Modified
            } else {
                EntryState::Unchanged
            };
            uow.tracker_mut().track(entity.clone(), state);
        } else if options.tracks() && !attached {
            uow.tracker_mut().track(entity.clone(), EntryState::Unchanged);
        }
        Ok(Some(entity))
    }

    pub async fn get_by_id_or_err(
        &self,
        uow: &mut UnitOfWork,
        id: &T::Id,
        options: ReadOptions,
    ) -> Result<T, MutationError> {
        self.get_by_id(uow, id, options)
            .await?
            .ok_or_else(|| MutationError::NotFound {
                entity_type: T::ENTITY_TYPE,
                id: id.to_string(),
            })
    }

    /// Every row of `T`. Tracked instances take precedence over stored rows.
    /// `lock_for_edit` is ignored here.
    pub async fn get_all(
        &self,
        uow: &mut UnitOfWork,
        options: ReadOptions,
    ) -> Result<Vec<T>, MutationError> {
        let scope = uow.read_scope(options.include_soft_deleted);
        let rows = uow.store().scan(T::ENTITY_TYPE, scope).await?;

        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            let loaded: T = serde_json::from_value(row.data)?;
            let cached = uow
                .tracker()
                .get::<T>(loaded.id())
                .map(|(entity, state)| (entity.clone(), state));
            let entity = match cached {
                Some((_, EntryState::Deleted)) => continue,
                Some((entity, _)) => entity,
                None => {
                    if options.tracking == Tracking::Tracked {
                        uow.tracker_mut().track(loaded.clone(), EntryState::Unchanged);
                    }
                    loaded
                }
            };
            if !options.include_soft_deleted && is_soft_deleted(&entity) {
                continue;
            }
            entities.push(entity);
        }
        Ok(entities)
    }

    pub async fn find<P>(
        &self,
        uow: &mut UnitOfWork,
        options: ReadOptions,
        predicate: P,
    ) -> Result<Vec<T>, MutationError>
    where
        P: Fn(&T) -> bool + Send,
    {
        let mut entities = self.get_all(uow, options).await?;
        entities.retain(|entity| predicate(entity));
        Ok(entities)
    }

    /// Whether a visible (not soft-deleted) row exists.
    pub async fn exists(&self, uow: &mut UnitOfWork, id: &T::Id) -> Result<bool, MutationError> {
        Ok(self
            .get_by_id(uow, id, ReadOptions::detached())
            .await?
            .is_some())
    }

    pub async fn count(
        &self,
        uow: &mut UnitOfWork,
        options: ReadOptions,
    ) -> Result<usize, MutationError> {
        Ok(self.get_all(uow, options).await?.len())
    }

    // --- Writes ---

    /// Stages an insert. Audit stamps are applied at save time.
    pub fn add(&self, uow: &mut UnitOfWork, entity: &T) {
        debug!(entity_type = T::ENTITY_TYPE, id = %entity.id(), "Add");
        uow.tracker_mut().track(entity.clone(), EntryState::Added);
    }

    /// Validates the lock, then stages an update.
    pub fn update(&self, uow: &mut UnitOfWork, entity: &T) -> Result<(), MutationError> {
        self.lock_service
            .validate_lock_for_update(entity, uow.user())?;
        uow.tracker_mut().track(entity.clone(), EntryState::Modified);
        Ok(())
    }

    /// Validates the lock, then stages a physical delete.
    pub fn remove(&self, uow: &mut UnitOfWork, entity: &T) -> Result<(), MutationError> {
        self.lock_service
            .validate_lock_for_update(entity, uow.user())?;
        debug!(entity_type = T::ENTITY_TYPE, id = %entity.id(), "Remove");
        uow.tracker_mut().track(entity.clone(), EntryState::Deleted);
        Ok(())
    }

    /// Tombstones the entity, or removes it when `T` is not soft-deletable.
    ///
    /// Returns `false` when the entity was already tombstoned.
    pub fn soft_delete(&self, uow: &mut UnitOfWork, entity: &T) -> Result<bool, MutationError> {
        self.lock_service
            .validate_lock_for_update(entity, uow.user())?;
        let Some(tombstone) = entity.soft_delete_behavior() else {
            uow.tracker_mut().track(entity.clone(), EntryState::Deleted);
            return Ok(true);
        };
        let changed = tombstone.mark_deleted(uow.user(), uow.now());
        uow.tracker_mut().track(entity.clone(), EntryState::Modified);
        Ok(changed)
    }

    /// Clears the tombstone. Returns whether one was set.
    pub fn restore(&self, uow: &mut UnitOfWork, entity: &T) -> Result<bool, MutationError> {
        self.lock_service
            .validate_lock_for_update(entity, uow.user())?;
        let restored = entity
            .soft_delete_behavior()
            .is_some_and(|tombstone| tombstone.restore());
        if restored {
            uow.tracker_mut().track(entity.clone(), EntryState::Modified);
        }
        Ok(restored)
    }

    // --- Locks ---

    /// Acquires or refreshes the lock for the acting user and stages the
    /// lock columns.
    pub fn lock(
        &self,
        uow: &mut UnitOfWork,
        entity: &T,
    ) -> Result<Option<LockOutcome>, MutationError> {
        let outcome = self.lock_service.lock_if_supported(entity, uow.user())?;
        if outcome.is_some() {
            uow.tracker_mut().track(entity.clone(), EntryState::Modified);
        }
        Ok(outcome)
    }

    /// Releases the acting user's lock. A write is staged only when a lock
    /// was actually set.
    pub fn unlock(&self, uow: &mut UnitOfWork, entity: &T) -> Result<(), MutationError> {
        let was_set = self
            .lock_service
            .lock_status(entity)
            .is_some_and(|info| info.is_set());
        self.lock_service.unlock_if_supported(entity, uow.user())?;
        if was_set {
            uow.tracker_mut().track(entity.clone(), EntryState::Modified);
        }
        Ok(())
    }

    /// Administrative release. Returns whether a lock was cleared.
    pub fn force_unlock(&self, uow: &mut UnitOfWork, entity: &T) -> bool {
        let cleared = self
            .lock_service
            .force_unlock_if_supported(entity, uow.user());
        if cleared {
            uow.tracker_mut().track(entity.clone(), EntryState::Modified);
        }
        cleared
    }

    pub fn lock_status(&self, entity: &T) -> Option<LockInfo> {
        self.lock_service.lock_status(entity)
    }

    /// Stages an update and releases the lock after the next durable save.
    pub fn save_and_release(&self, uow: &mut UnitOfWork, entity: &T) -> Result<(), MutationError> {
        self.update(uow, entity)?;
        uow.release_lock_after_save(entity);
        Ok(())
    }
}

fn is_soft_deleted<T: Entity>(entity: &T) -> bool {
    entity
        .soft_delete_behavior()
        .is_some_and(|tombstone| tombstone.is_deleted())
}
