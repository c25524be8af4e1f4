//! A product in the catalog, with its stock level.
//!
//! # Capabilities
//! Lockable, audited and version-checked. Stock changes go through the
//! lock so two editors cannot both reserve the last unit.

use mutation_framework::{
    Auditable, AuditingBehavior, Capabilities, ConcurrencyToken, Entity, LockError,
    Lockable, LockingBehavior, Versioned,
};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use uuid::Uuid;

/// Type-safe identifier for Products.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductId(pub Uuid);

impl ProductId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProductId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "product_{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: f64,
    pub stock: u32,
    #[serde(flatten)]
    lock: LockingBehavior,
    #[serde(flatten)]
    audit: AuditingBehavior,
    row_version: ConcurrencyToken,
}

/// DTOs for Product creation.
#[derive(Debug, Clone)]
pub struct ProductCreate {
    pub name: String,
    pub price: f64,
    pub stock: u32,
}

impl Product {
    /// Creates an unsaved product whose lock expires after
    /// `lock_timeout_minutes`.
    pub fn new(
        name: impl Into<String>,
        price: f64,
        stock: u32,
        lock_timeout_minutes: i64,
    ) -> Result<Self, LockError> {
        Ok(Self {
            id: ProductId::new(),
            name: name.into(),
            price,
            stock,
            lock: LockingBehavior::with_timeout_minutes(lock_timeout_minutes)?,
            audit: AuditingBehavior::default(),
            row_version: ConcurrencyToken::default(),
        })
    }
}

impl Lockable for Product {
    fn locking(&self) -> &LockingBehavior {
        &self.lock
    }
}

impl Auditable for Product {
    fn auditing(&self) -> &AuditingBehavior {
        &self.audit
    }
}

impl Versioned for Product {
    fn row_version(&self) -> ConcurrencyToken {
        self.row_version
    }

    fn set_row_version(&mut self, version: ConcurrencyToken) {
        self.row_version = version;
    }
}

impl Entity for Product {
    type Id = ProductId;
    const ENTITY_TYPE: &'static str = "Product";

    fn id(&self) -> &ProductId {
        &self.id
    }

    fn capabilities() -> Capabilities<Self> {
        Capabilities::none().lockable().auditable().versioned()
    }
}
