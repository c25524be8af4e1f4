//! Pure data: the entities of the commerce domain and their payloads.

pub mod customer;
pub mod order;
pub mod order_product;
pub mod product;

pub use customer::*;
pub use order::*;
pub use order_product::*;
pub use product::*;
