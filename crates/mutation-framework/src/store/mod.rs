//! # Entity Store
//!
//! The storage engine sits behind the [`EntityStore`] trait. Rows are JSON
//! objects keyed by the persisted column names, tables are named after
//! [`Entity::ENTITY_TYPE`](crate::Entity::ENTITY_TYPE), and the store owns the
//! `row_version` column of versioned tables.
//!
//! [`StoreActor`] is the in-process implementation: one task owns every table
//! and processes [`StoreRequest`]s sequentially, and [`StoreClient`] is the
//! cloneable handle.
//!
//! Store contract:
//! - `apply` is atomic. All writes of one call are validated before any is
//!   applied.
//! - A versioned update or delete whose expected version differs from the
//!   stored one fails with
//!   [`StoreError::VersionMismatch`](crate::StoreError::VersionMismatch).
//! - Writes inside a transaction are visible only to reads carrying the same
//!   [`TxId`] until commit. Commit re-validates against committed state and
//!   applies everything or nothing. A failed commit leaves the transaction
//!   open.
//! - Reads of soft-deletable tables hide tombstoned rows unless asked not to.

pub mod actor;
pub mod client;
pub mod message;

pub use actor::StoreActor;
pub use client::StoreClient;
pub use message::{Response, StoreRequest};

use crate::concurrency::ConcurrencyToken;
use crate::entity::CapabilitySet;
use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::{Debug, Display};

/// Column holding the tombstone flag of soft-deletable tables.
pub const IS_DELETED_COLUMN: &str = "is_deleted";

/// Column holding the row version of versioned tables.
pub const ROW_VERSION_COLUMN: &str = "row_version";

/// Handle of an open store transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId(pub u64);

impl Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx_{}", self.0)
    }
}

/// How a table treats the soft-delete filter and version checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableSchema {
    pub soft_delete: bool,
    pub versioned: bool,
}

impl From<CapabilitySet> for TableSchema {
    fn from(capabilities: CapabilitySet) -> Self {
        Self {
            soft_delete: capabilities.soft_delete,
            versioned: capabilities.concurrency,
        }
    }
}

/// A row as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub id: String,
    pub data: Value,
    pub version: ConcurrencyToken,
}

impl StoredRow {
    pub fn is_deleted(&self) -> bool {
        self.data
            .get(IS_DELETED_COLUMN)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Read parameters shared by `fetch` and `scan`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadScope {
    pub include_deleted: bool,
    pub tx: Option<TxId>,
}

/// A single row mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct RowWrite {
    pub table: &'static str,
    pub id: String,
    pub op: WriteOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Insert {
        data: Value,
    },
    /// `expected` is checked only on versioned tables.
    Update {
        data: Value,
        expected: Option<ConcurrencyToken>,
    },
    Delete {
        expected: Option<ConcurrencyToken>,
    },
}

impl WriteOp {
    pub fn expected(&self) -> Option<ConcurrencyToken> {
        match self {
            WriteOp::Insert { .. } => None,
            WriteOp::Update { expected, .. } | WriteOp::Delete { expected } => *expected,
        }
    }
}

/// Outcome of one write. `version` is `None` for deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResult {
    pub table: &'static str,
    pub id: String,
    pub version: Option<ConcurrencyToken>,
}

/// Storage engine contract used by the unit of work and repositories.
#[async_trait]
pub trait EntityStore: Debug + Send + Sync {
    async fn fetch(
        &self,
        table: &'static str,
        id: &str,
        scope: ReadScope,
    ) -> Result<Option<StoredRow>, StoreError>;

    async fn scan(&self, table: &'static str, scope: ReadScope)
        -> Result<Vec<StoredRow>, StoreError>;

    async fn apply(
        &self,
        writes: Vec<RowWrite>,
        tx: Option<TxId>,
    ) -> Result<Vec<WriteResult>, StoreError>;

    async fn begin(&self) -> Result<TxId, StoreError>;

    async fn commit(&self, tx: TxId) -> Result<(), StoreError>;

    async fn rollback(&self, tx: TxId) -> Result<(), StoreError>;

    /// Fire-and-forget rollback for callers that cannot await.
    fn abandon(&self, tx: TxId);
}
