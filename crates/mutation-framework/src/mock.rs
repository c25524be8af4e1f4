//! # Mock Store & Testing Guide
//!
//! [`MockStore`] speaks the same message protocol as the
//! [`StoreActor`](crate::store::StoreActor) but answers from a queue of
//! expectations instead of tables. It is the tool for testing the unit of
//! work and services against store behavior that is hard to produce with a
//! real store: commit failures, closed channels, conflicts at exact points.
//!
//! ## When to use the Mock vs the Real Store
//!
//! | Feature | MockStore | StoreActor |
//! |---------|-----------|------------|
//! | **State** | None (expectations) | Real tables and transactions |
//! | **Error Injection** | Easy (`return_err`) | Needs a real conflicting writer |
//! | **Assertions** | Every request is recorded | Only observable through reads |
//! | **Use Case** | Pipeline ordering, failure paths | End-to-end scenarios |
//!
//! ## Example
//!
//! ```rust
//! use mutation_framework::mock::{MockStore, StoreCall};
//! use mutation_framework::store::{EntityStore, TxId};
//! use mutation_framework::StoreError;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mock = MockStore::new();
//!     mock.expect_begin().return_ok(TxId(1));
//!     mock.expect_commit().return_err(StoreError::Unavailable("disk full".into()));
//!
//!     let store = mock.client();
//!     let tx = store.begin().await.unwrap();
//!     assert!(store.commit(tx).await.is_err());
//!
//!     assert_eq!(mock.received(), vec![StoreCall::Begin, StoreCall::Commit(TxId(1))]);
//!     mock.verify();
//! }
//! ```
//!
//! A request that does not match the next expectation panics the mock task;
//! the caller then sees [`StoreError::ActorDropped`].

use crate::error::StoreError;
use crate::store::{RowWrite, StoreClient, StoreRequest, StoredRow, TxId, WriteResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

// =============================================================================
// EXPECTATION BUILDER API
// =============================================================================

enum Expectation {
    Fetch(Result<Option<StoredRow>, StoreError>),
    Scan(Result<Vec<StoredRow>, StoreError>),
    Apply(Result<Vec<WriteResult>, StoreError>),
    Begin(Result<TxId, StoreError>),
    Commit(Result<(), StoreError>),
    Rollback(Result<(), StoreError>),
}

/// A request the mock received, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Fetch { table: &'static str, id: String },
    Scan { table: &'static str },
    Apply { writes: Vec<RowWrite>, tx: Option<TxId> },
    Begin,
    Commit(TxId),
    Rollback(TxId),
}

impl StoreCall {
    pub fn is_apply(&self) -> bool {
        matches!(self, StoreCall::Apply { .. })
    }
}

type Queue = Arc<Mutex<VecDeque<Expectation>>>;

/// A mock store with queued expectations.
pub struct MockStore {
    client: StoreClient,
    expectations: Queue,
    received: Arc<Mutex<Vec<StoreCall>>>,
    _handle: tokio::task::JoinHandle<()>,
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStore {
    /// Creates a mock with no expectations. Must be called inside a Tokio runtime.
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::channel::<StoreRequest>(100);
        let expectations: Queue = Arc::new(Mutex::new(VecDeque::new()));
        let received = Arc::new(Mutex::new(Vec::new()));
        let queue = Arc::clone(&expectations);
        let log = Arc::clone(&received);

        let handle = tokio::spawn(async move {
            while let Some(request) = receiver.recv().await {
                let expectation = queue.lock().pop_front();
                match (request, expectation) {
                    (
                        StoreRequest::Fetch {
                            table,
                            id,
                            respond_to,
                            ..
                        },
                        Some(Expectation::Fetch(response)),
                    ) => {
                        log.lock().push(StoreCall::Fetch { table, id });
                        let _ = respond_to.send(response);
                    }
                    (
                        StoreRequest::Scan {
                            table, respond_to, ..
                        },
                        Some(Expectation::Scan(response)),
                    ) => {
                        log.lock().push(StoreCall::Scan { table });
                        let _ = respond_to.send(response);
                    }
                    (
                        StoreRequest::Apply {
                            writes,
                            tx,
                            respond_to,
                        },
                        Some(Expectation::Apply(response)),
                    ) => {
                        log.lock().push(StoreCall::Apply { writes, tx });
                        let _ = respond_to.send(response);
                    }
                    (StoreRequest::Begin { respond_to }, Some(Expectation::Begin(response))) => {
                        log.lock().push(StoreCall::Begin);
                        let _ = respond_to.send(response);
                    }
                    (
                        StoreRequest::Commit { tx, respond_to },
                        Some(Expectation::Commit(response)),
                    ) => {
                        log.lock().push(StoreCall::Commit(tx));
                        let _ = respond_to.send(response);
                    }
                    (
                        StoreRequest::Rollback { tx, respond_to },
                        Some(Expectation::Rollback(response)),
                    ) => {
                        log.lock().push(StoreCall::Rollback(tx));
                        let _ = respond_to.send(response);
                    }
                    (request, _) => {
                        panic!("Unexpected request or expectation mismatch: {request:?}");
                    }
                }
            }
        });

        Self {
            client: StoreClient::new(sender),
            expectations,
            received,
            _handle: handle,
        }
    }

    /// Returns a client for the code under test.
    pub fn client(&self) -> StoreClient {
        self.client.clone()
    }

    pub fn expect_fetch(&self) -> ExpectationBuilder<Option<StoredRow>> {
        self.builder(Expectation::Fetch)
    }

    pub fn expect_scan(&self) -> ExpectationBuilder<Vec<StoredRow>> {
        self.builder(Expectation::Scan)
    }

    pub fn expect_apply(&self) -> ExpectationBuilder<Vec<WriteResult>> {
        self.builder(Expectation::Apply)
    }

    pub fn expect_begin(&self) -> ExpectationBuilder<TxId> {
        self.builder(Expectation::Begin)
    }

    pub fn expect_commit(&self) -> ExpectationBuilder<()> {
        self.builder(Expectation::Commit)
    }

    pub fn expect_rollback(&self) -> ExpectationBuilder<()> {
        self.builder(Expectation::Rollback)
    }

    /// Every request received so far.
    pub fn received(&self) -> Vec<StoreCall> {
        self.received.lock().clone()
    }

    /// Panics unless every expectation was consumed.
    pub fn verify(&self) {
        let remaining = self.expectations.lock().len();
        if remaining > 0 {
            panic!("Not all expectations were met. {remaining} remaining");
        }
    }

    fn builder<T>(&self, wrap: fn(Result<T, StoreError>) -> Expectation) -> ExpectationBuilder<T> {
        ExpectationBuilder {
            expectations: Arc::clone(&self.expectations),
            wrap,
        }
    }
}

/// Builder for one queued response.
pub struct ExpectationBuilder<T> {
    expectations: Queue,
    wrap: fn(Result<T, StoreError>) -> Expectation,
}

impl<T> ExpectationBuilder<T> {
    /// Sets the expectation to return a successful result.
    pub fn return_ok(self, value: T) {
        self.expectations.lock().push_back((self.wrap)(Ok(value)));
    }

    /// Sets the expectation to return an error.
    pub fn return_err(self, error: StoreError) {
        self.expectations.lock().push_back((self.wrap)(Err(error)));
    }
}
