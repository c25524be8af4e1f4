//! # Commerce Sample Library
//!
//! A small commerce domain built on `mutation_framework`: customers,
//! products, orders and order lines, each declaring the behaviors it needs.
//! Exposed as a library so the integration tests can drive the services.

pub mod error;
pub mod lifecycle;
pub mod model;
pub mod services;
