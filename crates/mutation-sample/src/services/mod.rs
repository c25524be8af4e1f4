//! # Domain Services
//!
//! One service per aggregate. Each call is one request: it opens a unit of
//! work for the acting user, does its reads and writes, saves, and drops the
//! unit of work. Services implement
//! [`DomainRepository`](mutation_framework::DomainRepository) for the
//! standard `find` / `find_for_edit` / `list` paths and map framework errors
//! into their own error type.

pub mod customer_service;
pub mod order_service;
pub mod product_service;

pub use customer_service::CustomerService;
pub use order_service::OrderService;
pub use product_service::ProductService;
