//! A customer order.
//!
//! # Capabilities
//! Order carries all four behaviors: it is locked while an operator edits
//! it, audited, cancelled by tombstone, and version-checked.
//!
//! Lines live in [`OrderProduct`](crate::model::OrderProduct) rows that
//! reference the order by id. Locking or cancelling an order says nothing
//! about its lines; the [`OrderService`](crate::services::OrderService)
//! handles them explicitly.

use crate::model::{CustomerId, ProductId};
use mutation_framework::{
    Auditable, AuditingBehavior, Capabilities, ConcurrencyToken, Entity, LockError,
    Lockable, LockingBehavior, SoftDeletable, SoftDeleteBehavior, Versioned,
};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use uuid::Uuid;

/// Type-safe identifier for Orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub Uuid);

impl OrderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "order_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Placed,
    Confirmed,
    Shipped,
    Cancelled,
}

impl OrderStatus {
    /// Placed → Confirmed → Shipped. Cancellation goes through
    /// [`OrderService::cancel`](crate::services::OrderService::cancel).
    pub fn can_become(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Placed, Confirmed) | (Confirmed, Shipped)
        )
    }
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OrderStatus::Placed => "Placed",
            OrderStatus::Confirmed => "Confirmed",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub status: OrderStatus,
    pub total: f64,
    #[serde(flatten)]
    lock: LockingBehavior,
    #[serde(flatten)]
    audit: AuditingBehavior,
    #[serde(flatten)]
    tombstone: SoftDeleteBehavior,
    row_version: ConcurrencyToken,
}

/// One requested line of a new order.
#[derive(Debug, Clone)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Payload for placing an order.
#[derive(Debug, Clone)]
pub struct OrderCreate {
    pub customer_id: CustomerId,
    pub lines: Vec<OrderLine>,
}

impl Order {
    /// Creates an unsaved order in status `Placed`.
    pub fn new(customer_id: CustomerId, lock_timeout_minutes: i64) -> Result<Self, LockError> {
        Ok(Self {
            id: OrderId::new(),
            customer_id,
            status: OrderStatus::Placed,
            total: 0.0,
            lock: LockingBehavior::with_timeout_minutes(lock_timeout_minutes)?,
            audit: AuditingBehavior::default(),
            tombstone: SoftDeleteBehavior::default(),
            row_version: ConcurrencyToken::default(),
        })
    }
}

impl Lockable for Order {
    fn locking(&self) -> &LockingBehavior {
        &self.lock
    }
}

impl Auditable for Order {
    fn auditing(&self) -> &AuditingBehavior {
        &self.audit
    }
}

impl SoftDeletable for Order {
    fn soft_delete(&self) -> &SoftDeleteBehavior {
        &self.tombstone
    }
}

impl Versioned for Order {
    fn row_version(&self) -> ConcurrencyToken {
        self.row_version
    }

    fn set_row_version(&mut self, version: ConcurrencyToken) {
        self.row_version = version;
    }
}

impl Entity for Order {
    type Id = OrderId;
    const ENTITY_TYPE: &'static str = "Order";

    fn id(&self) -> &OrderId {
        &self.id
    }

    fn capabilities() -> Capabilities<Self> {
        Capabilities::none()
            .lockable()
            .auditable()
            .soft_deletable()
            .versioned()
    }
}
