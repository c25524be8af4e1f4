//! # Change Tracker
//!
//! The unit of work's record of every entity it has loaded or been handed,
//! with the state that decides which write the next save issues. Tracked reads
//! go through it first, so it doubles as the identity map.

use crate::entity::{Entity, TrackedEntity};
use crate::error::MutationError;
use crate::store::{RowWrite, WriteOp, WriteResult};

/// What the next save does with an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Added,
    Unchanged,
    Modified,
    Deleted,
}

impl EntryState {
    pub fn is_dirty(self) -> bool {
        !matches!(self, EntryState::Unchanged)
    }

    /// Combine the current state with a newly requested one.
    ///
    /// Returns `None` when the entry should leave the tracker (added, then
    /// deleted before it was ever written).
    fn merge(self, requested: EntryState) -> Option<EntryState> {
        use EntryState::*;
        match (self, requested) {
            (Added, Deleted) => None,
            (Added, _) => Some(Added),
            (_, Deleted) => Some(Deleted),
            (Deleted, Unchanged) => Some(Deleted),
            (Deleted, _) => Some(Modified),
            (Unchanged, Unchanged) => Some(Unchanged),
            (Unchanged | Modified, _) => Some(Modified),
        }
    }
}

/// One tracked entity.
#[derive(Debug)]
pub struct EntityEntry {
    entity: Box<dyn TrackedEntity>,
    state: EntryState,
}

impl EntityEntry {
    pub fn entity(&self) -> &dyn TrackedEntity {
        self.entity.as_ref()
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    pub fn entity_type(&self) -> &'static str {
        self.entity.entity_type()
    }

    pub fn key(&self) -> String {
        self.entity.key()
    }

    /// Flags an unchanged entry for writing. Other states are left alone.
    pub fn mark_modified(&mut self) {
        if self.state == EntryState::Unchanged {
            self.state = EntryState::Modified;
        }
    }

    fn matches(&self, entity_type: &str, key: &str) -> bool {
        self.entity.entity_type() == entity_type && self.entity.key() == key
    }
}

#[derive(Debug, Default)]
pub struct ChangeTracker {
    entries: Vec<EntityEntry>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `entity` in `state`, merging with an existing entry for the same
    /// row. The given instance replaces the tracked one.
    pub fn track<T: Entity>(&mut self, entity: T, state: EntryState) {
        let key = entity.id().to_string();
        match self.position(T::ENTITY_TYPE, &key) {
            Some(index) => match self.entries[index].state.merge(state) {
                Some(merged) => {
                    let entry = &mut self.entries[index];
                    entry.entity = Box::new(entity);
                    entry.state = merged;
                }
                None => {
                    self.entries.remove(index);
                }
            },
            None => self.entries.push(EntityEntry {
                entity: Box::new(entity),
                state,
            }),
        }
    }

    /// The tracked instance of `T` with this id, if any.
    pub fn get<T: Entity>(&self, id: &T::Id) -> Option<(&T, EntryState)> {
        let key = id.to_string();
        self.position(T::ENTITY_TYPE, &key).and_then(|index| {
            let entry = &self.entries[index];
            entry
                .entity
                .as_any()
                .downcast_ref::<T>()
                .map(|entity| (entity, entry.state))
        })
    }

    pub fn find_mut(&mut self, entity_type: &str, key: &str) -> Option<&mut EntityEntry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.matches(entity_type, key))
    }

    pub fn entries(&self) -> impl Iterator<Item = &EntityEntry> {
        self.entries.iter()
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut EntityEntry> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_changes(&self) -> bool {
        self.entries.iter().any(|entry| entry.state.is_dirty())
    }

    /// Row writes for every dirty entry, in tracking order.
    pub fn pending_writes(&self) -> Result<Vec<RowWrite>, MutationError> {
        self.entries
            .iter()
            .filter(|entry| entry.state.is_dirty())
            .map(|entry| -> Result<RowWrite, MutationError> {
                let op = match entry.state {
                    EntryState::Added => WriteOp::Insert {
                        data: entry.entity.to_row()?,
                    },
                    EntryState::Modified => WriteOp::Update {
                        data: entry.entity.to_row()?,
                        expected: entry.entity.version(),
                    },
                    EntryState::Deleted | EntryState::Unchanged => WriteOp::Delete {
                        expected: entry.entity.version(),
                    },
                };
                Ok(RowWrite {
                    table: entry.entity_type(),
                    id: entry.key(),
                    op,
                })
            })
            .collect()
    }

    /// Apply store results: new versions are assigned, deleted entries leave,
    /// and everything else becomes unchanged.
    pub fn accept_changes(&mut self, results: &[WriteResult]) {
        for result in results {
            if let Some(version) = result.version {
                if let Some(entry) = self.find_mut(result.table, &result.id) {
                    entry.entity.assign_version(version);
                }
            }
        }
        self.entries
            .retain(|entry| entry.state != EntryState::Deleted);
        for entry in &mut self.entries {
            entry.state = EntryState::Unchanged;
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn position(&self, entity_type: &str, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.matches(entity_type, key))
    }
}
