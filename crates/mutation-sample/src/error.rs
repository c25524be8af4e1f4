//! Error types for the commerce services.
//!
//! Each service has its own error enum. Framework failures (lock conflicts,
//! concurrency conflicts, store errors) arrive through `#[from]` and keep
//! their type so callers can tell a retryable conflict from a domain rule.

use crate::model::{CustomerId, OrderStatus, ProductId};
use mutation_framework::MutationError;
use thiserror::Error;

/// Errors that can occur during customer operations.
#[derive(Debug, Error)]
pub enum CustomerError {
    #[error("Customer name must not be empty")]
    EmptyName,

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error(transparent)]
    Mutation(#[from] MutationError),
}

/// Errors that can occur during product operations.
#[derive(Debug, Error)]
pub enum ProductError {
    /// Prices must be finite and non-negative.
    #[error("Invalid price: {0}")]
    InvalidPrice(f64),

    /// The requested quantity exceeds the available stock.
    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: u32, available: u32 },

    #[error("Stock level would overflow")]
    StockOverflow,

    #[error(transparent)]
    Mutation(#[from] MutationError),
}

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("An order needs at least one line")]
    EmptyOrder,

    #[error("Unknown customer: {0}")]
    UnknownCustomer(CustomerId),

    #[error("Invalid quantity 0 for {0}")]
    InvalidQuantity(ProductId),

    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    #[error("Order cannot move from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error(transparent)]
    Mutation(#[from] MutationError),
}

impl OrderError {
    /// Whether retrying with fresh data could succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, OrderError::Mutation(e) if e.is_conflict())
    }
}
