//! A registered customer.
//!
//! # Capabilities
//! Audited, soft-deletable and version-checked. Customers are never locked;
//! concurrent renames are settled by the row version.

use mutation_framework::{
    Auditable, AuditingBehavior, Capabilities, ConcurrencyToken, Entity, SoftDeletable,
    SoftDeleteBehavior, Versioned,
};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use uuid::Uuid;

/// Type-safe identifier for Customers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub Uuid);

impl CustomerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CustomerId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for CustomerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "customer_{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    pub email: String,
    #[serde(flatten)]
    audit: AuditingBehavior,
    #[serde(flatten)]
    tombstone: SoftDeleteBehavior,
    row_version: ConcurrencyToken,
}

/// Payload for registering a customer.
#[derive(Debug, Clone)]
pub struct CustomerCreate {
    pub name: String,
    pub email: String,
}

impl Customer {
    /// Creates an unsaved customer with a fresh id.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: CustomerId::new(),
            name: name.into(),
            email: email.into(),
            audit: AuditingBehavior::default(),
            tombstone: SoftDeleteBehavior::default(),
            row_version: ConcurrencyToken::default(),
        }
    }
}

impl Auditable for Customer {
    fn auditing(&self) -> &AuditingBehavior {
        &self.audit
    }
}

impl SoftDeletable for Customer {
    fn soft_delete(&self) -> &SoftDeleteBehavior {
        &self.tombstone
    }
}

impl Versioned for Customer {
    fn row_version(&self) -> ConcurrencyToken {
        self.row_version
    }

    fn set_row_version(&mut self, version: ConcurrencyToken) {
        self.row_version = version;
    }
}

impl Entity for Customer {
    type Id = CustomerId;
    const ENTITY_TYPE: &'static str = "Customer";

    fn id(&self) -> &CustomerId {
        &self.id
    }

    fn capabilities() -> Capabilities<Self> {
        Capabilities::none().auditable().soft_deletable().versioned()
    }
}
