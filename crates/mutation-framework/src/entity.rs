//! # Entity Trait & Capabilities
//!
//! The [`Entity`] trait defines the contract every persisted record must
//! implement to pass through repositories and the unit of work. Cross-cutting
//! behaviors are composed by capability rather than by inheritance: an entity
//! implements any subset of [`Lockable`], [`Auditable`], [`SoftDeletable`] and
//! [`Versioned`] and declares that subset in [`Entity::capabilities`].
//!
//! # Architecture Note
//! The declaration is checked by the compiler. `Capabilities::lockable()` only
//! exists when `T: Lockable`, so an entity cannot claim a behavior it does not
//! carry. The capability table is a set of plain function pointers, so the
//! framework reaches a behavior without runtime type inspection.
//!
//! ```rust
//! use mutation_framework::{Capabilities, ConcurrencyToken, Entity, Lockable, LockingBehavior, Versioned};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! struct Ticket {
//!     id: u32,
//!     #[serde(flatten)]
//!     lock: LockingBehavior,
//!     row_version: ConcurrencyToken,
//! }
//!
//! impl Lockable for Ticket {
//!     fn locking(&self) -> &LockingBehavior { &self.lock }
//! }
//!
//! impl Versioned for Ticket {
//!     fn row_version(&self) -> ConcurrencyToken { self.row_version }
//!     fn set_row_version(&mut self, version: ConcurrencyToken) { self.row_version = version; }
//! }
//!
//! impl Entity for Ticket {
//!     type Id = u32;
//!     const ENTITY_TYPE: &'static str = "Ticket";
//!     fn id(&self) -> &u32 { &self.id }
//!     fn capabilities() -> Capabilities<Self> {
//!         Capabilities::none().lockable().versioned()
//!     }
//! }
//!
//! let set = Ticket::capabilities().set();
//! assert!(set.locking && set.concurrency);
//! assert!(!set.auditing && !set.soft_delete);
//! ```

use crate::audit::{Auditable, AuditingBehavior};
use crate::concurrency::{ConcurrencyToken, Versioned};
use crate::lock::{Lockable, LockingBehavior};
use crate::soft_delete::{SoftDeletable, SoftDeleteBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Trait that any persisted record must implement.
///
/// Entities serialize to rows; the serialized field names are the column
/// names. Behaviors are embedded with `#[serde(flatten)]` and the version as a
/// `row_version` field.
pub trait Entity: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Globally unique identifier. Its `Display` form is the row key.
    type Id: Clone + Eq + Hash + Display + Debug + Send + Sync + 'static;

    /// Table name and the entity type reported in errors.
    const ENTITY_TYPE: &'static str;

    fn id(&self) -> &Self::Id;

    /// Behaviors this entity carries. Defaults to none.
    fn capabilities() -> Capabilities<Self> {
        Capabilities::none()
    }
}

/// Statically checked capability table for one entity type.
pub struct Capabilities<T> {
    locking: Option<fn(&T) -> &LockingBehavior>,
    auditing: Option<fn(&T) -> &AuditingBehavior>,
    soft_delete: Option<fn(&T) -> &SoftDeleteBehavior>,
    version: Option<(fn(&T) -> ConcurrencyToken, fn(&mut T, ConcurrencyToken))>,
}

impl<T> Clone for Capabilities<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Capabilities<T> {}

impl<T> Debug for Capabilities<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Capabilities").field(&self.set()).finish()
    }
}

impl<T> Capabilities<T> {
    pub fn none() -> Self {
        Self {
            locking: None,
            auditing: None,
            soft_delete: None,
            version: None,
        }
    }

    pub fn lockable(mut self) -> Self
    where
        T: Lockable,
    {
        self.locking = Some(<T as Lockable>::locking);
        self
    }

    pub fn auditable(mut self) -> Self
    where
        T: Auditable,
    {
        self.auditing = Some(<T as Auditable>::auditing);
        self
    }

    pub fn soft_deletable(mut self) -> Self
    where
        T: SoftDeletable,
    {
        self.soft_delete = Some(<T as SoftDeletable>::soft_delete);
        self
    }

    pub fn versioned(mut self) -> Self
    where
        T: Versioned,
    {
        self.version = Some((
            <T as Versioned>::row_version,
            <T as Versioned>::set_row_version,
        ));
        self
    }

    pub fn locking<'a>(&self, entity: &'a T) -> Option<&'a LockingBehavior> {
        self.locking.map(|get| get(entity))
    }

    pub fn auditing<'a>(&self, entity: &'a T) -> Option<&'a AuditingBehavior> {
        self.auditing.map(|get| get(entity))
    }

    pub fn soft_delete<'a>(&self, entity: &'a T) -> Option<&'a SoftDeleteBehavior> {
        self.soft_delete.map(|get| get(entity))
    }

    pub fn row_version(&self, entity: &T) -> Option<ConcurrencyToken> {
        self.version.map(|(get, _)| get(entity))
    }

    /// Returns `false` when the entity is not versioned.
    pub fn set_row_version(&self, entity: &mut T, version: ConcurrencyToken) -> bool {
        match self.version {
            Some((_, set)) => {
                set(entity, version);
                true
            }
            None => false,
        }
    }

    pub fn set(&self) -> CapabilitySet {
        CapabilitySet {
            locking: self.locking.is_some(),
            auditing: self.auditing.is_some(),
            soft_delete: self.soft_delete.is_some(),
            concurrency: self.version.is_some(),
        }
    }
}

/// The behaviors an entity type carries, without the accessors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    pub locking: bool,
    pub auditing: bool,
    pub soft_delete: bool,
    pub concurrency: bool,
}

/// Object-safe view of an entity held by the change tracker.
///
/// Implemented for every [`Entity`]; processors and the lock service work
/// through it so they can handle mixed entity types in one unit of work.
pub trait TrackedEntity: Debug + Send + Sync {
    fn entity_type(&self) -> &'static str;
    fn key(&self) -> String;
    fn locking_behavior(&self) -> Option<&LockingBehavior>;
    fn auditing_behavior(&self) -> Option<&AuditingBehavior>;
    fn soft_delete_behavior(&self) -> Option<&SoftDeleteBehavior>;
    fn version(&self) -> Option<ConcurrencyToken>;
    fn assign_version(&mut self, version: ConcurrencyToken);
    fn to_row(&self) -> Result<serde_json::Value, serde_json::Error>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Entity> TrackedEntity for T {
    fn entity_type(&self) -> &'static str {
        T::ENTITY_TYPE
    }

    fn key(&self) -> String {
        self.id().to_string()
    }

    fn locking_behavior(&self) -> Option<&LockingBehavior> {
        T::capabilities().locking(self)
    }

    fn auditing_behavior(&self) -> Option<&AuditingBehavior> {
        T::capabilities().auditing(self)
    }

    fn soft_delete_behavior(&self) -> Option<&SoftDeleteBehavior> {
        T::capabilities().soft_delete(self)
    }

    fn version(&self) -> Option<ConcurrencyToken> {
        T::capabilities().row_version(self)
    }

    fn assign_version(&mut self, version: ConcurrencyToken) {
        T::capabilities().set_row_version(self, version);
    }

    fn to_row(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
