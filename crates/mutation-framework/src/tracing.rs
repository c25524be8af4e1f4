//! # Observability & Tracing
//!
//! Structured logging for the framework and the applications built on it.
//!
//! ## What Gets Traced
//!
//! - **Store**: startup and shutdown with table and row counts at `info`,
//!   every request at `debug`, rejected writes and commits at `warn`
//! - **Locks**: conflicts and forced releases at `warn`, takeovers of expired
//!   locks at `info`
//! - **Unit of work**: transaction begin, commit and rollback at `info`,
//!   automatic rollbacks and abandoned transactions at `warn`
//!
//! Entity types and ids are recorded as fields, so the formatter hides module
//! targets.
//!
//! ## Usage Examples
//!
//! ```bash
//! # Transaction boundaries and lock events
//! RUST_LOG=info cargo run
//!
//! # Every store request
//! RUST_LOG=debug cargo run
//!
//! # Only the framework at debug
//! RUST_LOG=mutation_framework=debug cargo run
//! ```
//!
//! ## Sample Output
//!
//! ```text
//! INFO Store started tables=4
//! INFO place_order{user=user_5c1e…}: Transaction started tx=tx_1
//! INFO place_order{user=user_5c1e…}: Transaction committed tx=tx_1
//! WARN open_for_edit{user=user_9a02…}: Lock conflict entity_type="Order" id=order_… holder=user_5c1e…
//! ```

/// Installs the global subscriber: `RUST_LOG` filtering, compact format, no
/// module targets.
///
/// Panics if a global subscriber is already set; call it once from `main`.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
