//! # Mutation Framework
//!
//! Building blocks for guarding concurrent, multi-user mutation of persisted
//! records without a distributed lock manager. The crate composes four
//! cross-cutting behaviors onto arbitrary entity types and sequences them
//! around a transactional save:
//!
//! - **Pessimistic locking**: time-boxed, per-entity locks with fail-fast
//!   acquisition ([`LockingBehavior`], [`EntityLockService`])
//! - **Optimistic concurrency**: store-owned row versions; stale writes fail
//!   with [`MutationError::ConcurrencyConflict`] ([`ConcurrencyToken`])
//! - **Auditing**: creation and modification stamps ([`AuditingBehavior`])
//! - **Soft delete**: tombstones hidden from default reads
//!   ([`SoftDeleteBehavior`])
//!
//! ## Architecture Overview
//!
//! ```text
//! caller ─▶ Repository (read, optional lock) ─▶ caller mutates entity
//!        ─▶ Repository::update / remove (validates lock)
//!        ─▶ UnitOfWork::save_changes
//!              before_save processors ─▶ EntityStore::apply ─▶ after_save processors
//!        ─▶ UnitOfWork::commit_transaction / rollback_transaction
//! ```
//!
//! 1. **Entity Layer** ([`Entity`], [`Capabilities`]) - your records and the
//!    behaviors they declare
//! 2. **Boundary Layer** ([`Repository`], [`EntityLockService`]) - reads,
//!    staged writes and lock decisions
//! 3. **Transaction Layer** ([`UnitOfWork`], [`UnitOfWorkProcessor`]) - the
//!    processor pipeline, commit and rollback
//! 4. **Storage Layer** ([`store::EntityStore`]) - an actor-backed
//!    in-process store, or any engine implementing the trait
//!
//! ## Capabilities, not Inheritance
//!
//! An entity implements any subset of [`Lockable`], [`Auditable`],
//! [`SoftDeletable`] and [`Versioned`] and declares that subset in
//! [`Entity::capabilities`]. The declaration is compiler-checked and recorded
//! once at startup in a [`CapabilityRegistry`]. Every component detects a
//! capability and treats its absence as "nothing to do".
//!
//! ## Caller Identity
//!
//! The acting [`UserId`] is bound to a unit of work when it is created and
//! passed explicitly to every lock operation. There is no ambient current
//! user.
//!
//! ## Limits
//!
//! Locks are advisory and process-local. Two service instances do not share
//! lock state; the row version is the last line of defense against lost
//! updates. Conflicting edits are reported, never merged.
//!
//! ## Testing
//!
//! [`clock::ManualClock`] pins and advances time for expiry scenarios, and
//! [`mock::MockStore`] answers store requests from queued expectations for
//! failure-path tests. See the [`mock`] module.

pub mod audit;
pub mod clock;
pub mod concurrency;
pub mod config;
pub mod domain_repository;
pub mod entity;
pub mod error;
pub mod identity;
pub mod lock;
pub mod lock_service;
pub mod mock;
pub mod processor;
pub mod registry;
pub mod repository;
pub mod soft_delete;
pub mod store;
pub mod tracing;
pub mod tracker;
pub mod unit_of_work;

// Re-export core types for convenience
pub use audit::{AuditInfo, Auditable, AuditingBehavior};
pub use clock::{Clock, ManualClock, SystemClock};
pub use concurrency::{ConcurrencyToken, Versioned};
pub use config::{ConfigError, FrameworkConfig};
pub use domain_repository::DomainRepository;
pub use entity::{Capabilities, CapabilitySet, Entity, TrackedEntity};
pub use error::{MutationError, StoreError, TransactionStateError};
pub use identity::UserId;
pub use lock::{LockError, LockInfo, LockOutcome, Lockable, LockingBehavior};
pub use lock_service::EntityLockService;
pub use processor::{
    AuditProcessor, LockReleaseProcessor, ProcessorContext, UnitOfWorkProcessor,
};
pub use registry::{CapabilityRegistry, EntityDescriptor};
pub use repository::{ReadOptions, Repository, Tracking};
pub use soft_delete::{SoftDeletable, SoftDeleteBehavior, SoftDeleteInfo};
pub use tracker::{ChangeTracker, EntryState};
pub use unit_of_work::{UnitOfWork, UnitOfWorkFactory};
