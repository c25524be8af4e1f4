//! # Store Messages
//!
//! Requests sent from a [`StoreClient`](super::StoreClient) to the
//! [`StoreActor`](super::StoreActor). Every request carries a oneshot sender
//! for its reply.

use super::{ReadScope, RowWrite, StoredRow, TxId, WriteResult};
use crate::error::StoreError;
use tokio::sync::oneshot;

/// Type alias for the one-shot response channel used by the store actor.
pub type Response<T> = oneshot::Sender<Result<T, StoreError>>;

#[derive(Debug)]
pub enum StoreRequest {
    Fetch {
        table: &'static str,
        id: String,
        scope: ReadScope,
        respond_to: Response<Option<StoredRow>>,
    },
    Scan {
        table: &'static str,
        scope: ReadScope,
        respond_to: Response<Vec<StoredRow>>,
    },
    Apply {
        writes: Vec<RowWrite>,
        tx: Option<TxId>,
        respond_to: Response<Vec<WriteResult>>,
    },
    Begin {
        respond_to: Response<TxId>,
    },
    Commit {
        tx: TxId,
        respond_to: Response<()>,
    },
    Rollback {
        tx: TxId,
        respond_to: Response<()>,
    },
}
