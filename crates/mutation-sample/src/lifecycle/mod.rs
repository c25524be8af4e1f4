//! # System Lifecycle & Orchestration
//!
//! Startup order matters: capabilities are registered first, because the
//! store derives its table layout from the registry and repositories refuse
//! unregistered types. Then the store actor is spawned and the services are
//! wired to one shared [`UnitOfWorkFactory`].
//!
//! ## Graceful Shutdown
//!
//! 1. **Drop all store handles** - the services and the factory own the only
//!    clients, so dropping them closes the store's channel
//! 2. **Store detects closure** - `receiver.recv()` returns `None`
//! 3. **Await completion** - the store task logs its final table sizes
//!
//! A unit of work still alive at shutdown keeps the channel open; finish
//! requests before calling [`CommerceSystem::shutdown`].

pub mod commerce_system;

pub use commerce_system::*;
