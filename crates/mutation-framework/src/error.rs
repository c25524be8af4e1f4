//! # Framework Errors
//!
//! Error types shared by the lock service, repositories, the unit of work and
//! the store. Domain crates wrap [`MutationError`] in their own error enums.

use crate::concurrency::ConcurrencyToken;
use crate::identity::UserId;
use crate::lock::LockError;
use crate::store::TxId;
use chrono::{DateTime, Utc};

/// Errors surfaced by repositories and the unit of work.
#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    #[error("{entity_type} {id} not found")]
    NotFound { entity_type: &'static str, id: String },

    #[error("{entity_type} {id} is locked by {holder_id} since {locked_at}")]
    LockConflict {
        entity_type: &'static str,
        id: String,
        holder_id: UserId,
        locked_at: DateTime<Utc>,
    },

    /// Not a failure: describes an expired lock that changed hands.
    #[error("lock on {entity_type} {id} held by {previous_holder} since {locked_at} expired and was taken over by {taken_by}")]
    LockExpired {
        entity_type: &'static str,
        id: String,
        previous_holder: UserId,
        locked_at: DateTime<Utc>,
        taken_by: UserId,
    },

    #[error("{entity_type} {id} was modified concurrently (client {client_version}, stored {stored_version:?})")]
    ConcurrencyConflict {
        entity_type: &'static str,
        id: String,
        client_version: ConcurrencyToken,
        stored_version: Option<ConcurrencyToken>,
    },

    #[error(transparent)]
    TransactionState(#[from] TransactionStateError),

    #[error("entity type {entity_type} has no registered capabilities")]
    Unregistered { entity_type: &'static str },

    #[error("processor {processor} failed: {message}")]
    Processor {
        processor: &'static str,
        message: String,
    },

    #[error("invalid lock state: {0}")]
    Lock(#[from] LockError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("row mapping failed: {0}")]
    Mapping(#[from] serde_json::Error),
}

/// Misuse of the explicit transaction API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransactionStateError {
    #[error("a transaction is already active")]
    AlreadyActive,
    #[error("no transaction is active")]
    NotActive,
}

/// Errors raised by an [`EntityStore`](crate::store::EntityStore).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store actor closed")]
    ActorClosed,
    #[error("store actor dropped response channel")]
    ActorDropped,
    #[error("version mismatch on {table} {id}: expected {expected}, found {actual:?}")]
    VersionMismatch {
        table: &'static str,
        id: String,
        expected: ConcurrencyToken,
        actual: Option<ConcurrencyToken>,
    },
    #[error("{table} {id} already exists")]
    DuplicateKey { table: &'static str, id: String },
    #[error("{table} {id} does not exist")]
    MissingRow { table: &'static str, id: String },
    #[error("unknown table {0}")]
    UnknownTable(&'static str),
    #[error("unknown transaction {0}")]
    UnknownTransaction(TxId),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl MutationError {
    /// Storage-level version mismatches become typed conflicts; everything
    /// else passes through.
    pub fn from_store(error: StoreError) -> Self {
        match error {
            StoreError::VersionMismatch {
                table,
                id,
                expected,
                actual,
            } => Self::ConcurrencyConflict {
                entity_type: table,
                id,
                client_version: expected,
                stored_version: actual,
            },
            other => Self::Store(other),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::LockConflict { .. } | Self::ConcurrencyConflict { .. }
        )
    }
}
