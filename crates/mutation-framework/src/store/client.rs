//! # Store Client
//!
//! The "client" half of the in-process store.

use super::message::StoreRequest;
use super::{EntityStore, ReadScope, RowWrite, StoredRow, TxId, WriteResult};
use crate::error::StoreError;
use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Cloneable handle to a running [`StoreActor`](super::StoreActor).
///
/// * **Cheap to clone**: holds only the channel sender.
/// * **Error mapping**: a closed request channel becomes
///   [`StoreError::ActorClosed`], a dropped reply becomes
///   [`StoreError::ActorDropped`].
#[derive(Debug, Clone)]
pub struct StoreClient {
    sender: mpsc::Sender<StoreRequest>,
}

impl StoreClient {
    pub fn new(sender: mpsc::Sender<StoreRequest>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, StoreError>>) -> StoreRequest,
    ) -> Result<T, StoreError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| StoreError::ActorClosed)?;
        response.await.map_err(|_| StoreError::ActorDropped)?
    }
}

#[async_trait]
impl EntityStore for StoreClient {
    async fn fetch(
        &self,
        table: &'static str,
        id: &str,
        scope: ReadScope,
    ) -> Result<Option<StoredRow>, StoreError> {
        let id = id.to_string();
        self.request(|respond_to| StoreRequest::Fetch {
            table,
            id,
            scope,
            respond_to,
        })
        .await
    }

    async fn scan(
        &self,
        table: &'static str,
        scope: ReadScope,
    ) -> Result<Vec<StoredRow>, StoreError> {
        self.request(|respond_to| StoreRequest::Scan {
            table,
            scope,
            respond_to,
        })
        .await
    }

    async fn apply(
        &self,
        writes: Vec<RowWrite>,
        tx: Option<TxId>,
    ) -> Result<Vec<WriteResult>, StoreError> {
        self.request(|respond_to| StoreRequest::Apply {
            writes,
            tx,
            respond_to,
        })
        .await
    }

    async fn begin(&self) -> Result<TxId, StoreError> {
        self.request(|respond_to| StoreRequest::Begin { respond_to })
            .await
    }

    async fn commit(&self, tx: TxId) -> Result<(), StoreError> {
        self.request(|respond_to| StoreRequest::Commit { tx, respond_to })
            .await
    }

    async fn rollback(&self, tx: TxId) -> Result<(), StoreError> {
        self.request(|respond_to| StoreRequest::Rollback { tx, respond_to })
            .await
    }

    /// Queues a rollback without waiting for the reply. When the channel is
    /// full the send is handed to the current runtime so the overlay is still
    /// discarded once the store catches up.
    fn abandon(&self, tx: TxId) {
        let (respond_to, _) = oneshot::channel();
        match self
            .sender
            .try_send(StoreRequest::Rollback { tx, respond_to })
        {
            Ok(()) => {}
            Err(TrySendError::Full(request)) => match Handle::try_current() {
                Ok(handle) => {
                    debug!(%tx, "Store busy; queueing rollback of abandoned transaction");
                    let sender = self.sender.clone();
                    handle.spawn(async move {
                        if sender.send(request).await.is_err() {
                            warn!(%tx, "Store closed before abandoned transaction was rolled back");
                        }
                    });
                }
                Err(_) => {
                    warn!(%tx, "Store busy outside a runtime; abandoned transaction left open");
                }
            },
            Err(TrySendError::Closed(_)) => {
                warn!(%tx, "Could not abandon transaction; store closed");
            }
        }
    }
}
