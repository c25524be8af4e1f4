//! One line of an order: which product, how many, at what unit price.
//!
//! Audited and version-checked only. Lines are created with their order and
//! removed when it is cancelled.

use crate::model::{OrderId, ProductId};
use mutation_framework::{
    Auditable, AuditingBehavior, Capabilities, ConcurrencyToken, Entity, Versioned,
};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderProductId(pub Uuid);

impl Display for OrderProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line_{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderProduct {
    pub id: OrderProductId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: f64,
    #[serde(flatten)]
    audit: AuditingBehavior,
    row_version: ConcurrencyToken,
}

impl OrderProduct {
    pub fn new(order_id: OrderId, product_id: ProductId, quantity: u32, unit_price: f64) -> Self {
        Self {
            id: OrderProductId(Uuid::new_v4()),
            order_id,
            product_id,
            quantity,
            unit_price,
            audit: AuditingBehavior::default(),
            row_version: ConcurrencyToken::default(),
        }
    }

    pub fn line_total(&self) -> f64 {
        self.unit_price * f64::from(self.quantity)
    }
}

impl Auditable for OrderProduct {
    fn auditing(&self) -> &AuditingBehavior {
        &self.audit
    }
}

impl Versioned for OrderProduct {
    fn row_version(&self) -> ConcurrencyToken {
        self.row_version
    }

    fn set_row_version(&mut self, version: ConcurrencyToken) {
        self.row_version = version;
    }
}

impl Entity for OrderProduct {
    type Id = OrderProductId;
    const ENTITY_TYPE: &'static str = "OrderProduct";

    fn id(&self) -> &OrderProductId {
        &self.id
    }

    fn capabilities() -> Capabilities<Self> {
        Capabilities::none().auditable().versioned()
    }
}
