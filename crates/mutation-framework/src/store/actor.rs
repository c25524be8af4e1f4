//! # Store Actor
//!
//! The "server" half of the in-process store. It owns every table and the
//! transaction overlays, and processes [`StoreRequest`]s one at a time on its
//! own task, so table state needs no locking.

use super::client::StoreClient;
use super::message::StoreRequest;
use super::{
    ReadScope, RowWrite, StoredRow, TableSchema, TxId, WriteOp, WriteResult, ROW_VERSION_COLUMN,
};
use crate::concurrency::ConcurrencyToken;
use crate::error::StoreError;
use crate::registry::CapabilityRegistry;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

type RowKey = (&'static str, String);

#[derive(Debug, Default)]
struct Table {
    schema: TableSchema,
    rows: BTreeMap<String, StoredRow>,
}

/// Writes staged by one transaction, keyed by table and row id.
#[derive(Debug, Clone, Default)]
struct Overlay {
    staged: BTreeMap<RowKey, Staged>,
}

#[derive(Debug, Clone)]
struct Staged {
    /// Committed version when the row was first staged.
    base: Option<ConcurrencyToken>,
    /// Whether commit must re-check `base` against committed state.
    checked: bool,
    /// `None` stages a delete.
    row: Option<StoredRow>,
}

/// The in-process storage engine.
///
/// # Usage Pattern
///
/// 1. **Create**: `StoreActor::new()` returns the actor and its client.
/// 2. **Run**: spawn `actor.run()` on the runtime.
/// 3. **Use**: share the [`StoreClient`] (it is cheap to clone).
///
/// The run loop ends once every client has been dropped.
///
/// # Versions
///
/// Row versions come from a single counter, so every successful write gets a
/// version no row has had before. Versions allocated to writes that are later
/// rolled back are never reused.
pub struct StoreActor {
    receiver: mpsc::Receiver<StoreRequest>,
    tables: HashMap<&'static str, Table>,
    transactions: HashMap<TxId, Overlay>,
    next_version: u64,
    next_tx: u64,
}

impl StoreActor {
    /// Creates a store with one table per registered entity type.
    ///
    /// `buffer_size` is the capacity of the request channel; when it is full,
    /// clients wait for space.
    pub fn new(buffer_size: usize, registry: &CapabilityRegistry) -> (Self, StoreClient) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let tables = registry
            .iter()
            .map(|descriptor| {
                let table = Table {
                    schema: TableSchema::from(descriptor.capabilities),
                    rows: BTreeMap::new(),
                };
                (descriptor.entity_type, table)
            })
            .collect();
        let actor = Self {
            receiver,
            tables,
            transactions: HashMap::new(),
            next_version: 0,
            next_tx: 0,
        };
        (actor, StoreClient::new(sender))
    }

    /// Runs the event loop until the channel closes.
    pub async fn run(mut self) {
        info!(tables = self.tables.len(), "Store started");

        while let Some(msg) = self.receiver.recv().await {
            match msg {
                StoreRequest::Fetch {
                    table,
                    id,
                    scope,
                    respond_to,
                } => {
                    let result = self.fetch(table, &id, scope);
                    debug!(table, %id, found = matches!(result, Ok(Some(_))), "Fetch");
                    let _ = respond_to.send(result);
                }
                StoreRequest::Scan {
                    table,
                    scope,
                    respond_to,
                } => {
                    let result = self.scan(table, scope);
                    debug!(table, rows = result.as_ref().map_or(0, Vec::len), "Scan");
                    let _ = respond_to.send(result);
                }
                StoreRequest::Apply {
                    writes,
                    tx,
                    respond_to,
                } => {
                    debug!(writes = writes.len(), ?tx, "Apply");
                    let result = self.apply(writes, tx);
                    if let Err(e) = &result {
                        warn!(?tx, error = %e, "Apply rejected");
                    }
                    let _ = respond_to.send(result);
                }
                StoreRequest::Begin { respond_to } => {
                    self.next_tx += 1;
                    let tx = TxId(self.next_tx);
                    self.transactions.insert(tx, Overlay::default());
                    debug!(%tx, open = self.transactions.len(), "Begin");
                    let _ = respond_to.send(Ok(tx));
                }
                StoreRequest::Commit { tx, respond_to } => {
                    let result = self.commit(tx);
                    match &result {
                        Ok(rows) => debug!(%tx, rows, "Commit"),
                        Err(e) => warn!(%tx, error = %e, "Commit rejected"),
                    }
                    let _ = respond_to.send(result.map(|_| ()));
                }
                StoreRequest::Rollback { tx, respond_to } => {
                    let result = match self.transactions.remove(&tx) {
                        Some(overlay) => {
                            debug!(%tx, discarded = overlay.staged.len(), "Rollback");
                            Ok(())
                        }
                        None => {
                            warn!(%tx, "Rollback of unknown transaction");
                            Err(StoreError::UnknownTransaction(tx))
                        }
                    };
                    let _ = respond_to.send(result);
                }
            }
        }

        let rows: usize = self.tables.values().map(|t| t.rows.len()).sum();
        info!(
            tables = self.tables.len(),
            rows,
            open_transactions = self.transactions.len(),
            "Shutdown"
        );
    }

    fn table(&self, table: &'static str) -> Result<&Table, StoreError> {
        self.tables
            .get(table)
            .ok_or(StoreError::UnknownTable(table))
    }

    fn overlay(&self, tx: Option<TxId>) -> Result<Option<&Overlay>, StoreError> {
        tx.map(|tx| {
            self.transactions
                .get(&tx)
                .ok_or(StoreError::UnknownTransaction(tx))
        })
        .transpose()
    }

    /// The row as seen through `overlay`, or the committed row.
    fn visible(
        &self,
        table: &'static str,
        id: &str,
        overlay: Option<&Overlay>,
    ) -> Result<Option<StoredRow>, StoreError> {
        let committed = self.table(table)?.rows.get(id);
        let staged = overlay.and_then(|o| o.staged.get(&(table, id.to_string())));
        Ok(match staged {
            Some(staged) => staged.row.clone(),
            None => committed.cloned(),
        })
    }

    fn fetch(
        &self,
        table: &'static str,
        id: &str,
        scope: ReadScope,
    ) -> Result<Option<StoredRow>, StoreError> {
        let schema = self.table(table)?.schema;
        let overlay = self.overlay(scope.tx)?;
        let row = self.visible(table, id, overlay)?;
        Ok(row.filter(|row| passes_filter(schema, scope, row)))
    }

    fn scan(&self, table: &'static str, scope: ReadScope) -> Result<Vec<StoredRow>, StoreError> {
        let source = self.table(table)?;
        let overlay = self.overlay(scope.tx)?;

        let mut rows = source.rows.clone();
        if let Some(overlay) = overlay {
            for ((staged_table, id), staged) in &overlay.staged {
                if *staged_table != table {
                    continue;
                }
                match &staged.row {
                    Some(row) => {
                        rows.insert(id.clone(), row.clone());
                    }
                    None => {
                        rows.remove(id);
                    }
                }
            }
        }

        Ok(rows
            .into_values()
            .filter(|row| passes_filter(source.schema, scope, row))
            .collect())
    }

    fn apply(
        &mut self,
        writes: Vec<RowWrite>,
        tx: Option<TxId>,
    ) -> Result<Vec<WriteResult>, StoreError> {
        match tx {
            None => {
                let mut overlay = Overlay::default();
                let results = self.stage_all(&mut overlay, writes)?;
                self.validate(&overlay)?;
                self.install(overlay);
                Ok(results)
            }
            Some(tx) => {
                let mut overlay = self
                    .transactions
                    .remove(&tx)
                    .ok_or(StoreError::UnknownTransaction(tx))?;
                let result = self.stage_all(&mut overlay, writes);
                self.transactions.insert(tx, overlay);
                result
            }
        }
    }

    fn commit(&mut self, tx: TxId) -> Result<usize, StoreError> {
        let overlay = self
            .transactions
            .get(&tx)
            .ok_or(StoreError::UnknownTransaction(tx))?;
        self.validate(overlay)?;
        let overlay = self
            .transactions
            .remove(&tx)
            .ok_or(StoreError::UnknownTransaction(tx))?;
        Ok(self.install(overlay))
    }

    /// Stages every write or none of them.
    fn stage_all(
        &mut self,
        overlay: &mut Overlay,
        writes: Vec<RowWrite>,
    ) -> Result<Vec<WriteResult>, StoreError> {
        let mut scratch = overlay.clone();
        let results = writes
            .into_iter()
            .map(|write| self.stage(&mut scratch, write))
            .collect::<Result<Vec<_>, _>>()?;
        *overlay = scratch;
        Ok(results)
    }

    fn stage(&mut self, overlay: &mut Overlay, write: RowWrite) -> Result<WriteResult, StoreError> {
        let RowWrite { table, id, op } = write;
        let schema = self.table(table)?.schema;
        let committed_version = self.table(table)?.rows.get(&id).map(|row| row.version);
        let current = self.visible(table, &id, Some(&*overlay))?;

        let expected = if schema.versioned { op.expected() } else { None };
        if let Some(expected) = expected {
            let actual = current.as_ref().map(|row| row.version);
            if actual != Some(expected) {
                return Err(StoreError::VersionMismatch {
                    table,
                    id,
                    expected,
                    actual,
                });
            }
        }

        let is_insert = matches!(op, WriteOp::Insert { .. });
        let row = match op {
            WriteOp::Insert { data } => {
                if current.is_some() {
                    return Err(StoreError::DuplicateKey { table, id });
                }
                Some(self.stamp(schema, id.clone(), data))
            }
            WriteOp::Update { data, .. } => {
                if current.is_none() {
                    return Err(StoreError::MissingRow { table, id });
                }
                Some(self.stamp(schema, id.clone(), data))
            }
            WriteOp::Delete { .. } => {
                if current.is_none() {
                    return Err(StoreError::MissingRow { table, id });
                }
                None
            }
        };

        let version = row.as_ref().map(|row| row.version);
        let staged = overlay
            .staged
            .entry((table, id.clone()))
            .or_insert_with(|| Staged {
                base: committed_version,
                checked: false,
                row: None,
            });
        staged.checked |= is_insert || expected.is_some();
        staged.row = row;

        Ok(WriteResult { table, id, version })
    }

    /// Allocates the next version and writes it into the row.
    fn stamp(&mut self, schema: TableSchema, id: String, mut data: Value) -> StoredRow {
        self.next_version += 1;
        let version = ConcurrencyToken(self.next_version);
        if schema.versioned {
            if let Value::Object(columns) = &mut data {
                columns.insert(ROW_VERSION_COLUMN.to_string(), Value::from(version.0));
            }
        }
        StoredRow { id, data, version }
    }

    /// First committer wins: every checked row must still be at its base version.
    fn validate(&self, overlay: &Overlay) -> Result<(), StoreError> {
        for ((table, id), staged) in &overlay.staged {
            if !staged.checked {
                continue;
            }
            let table = *table;
            let actual = self.table(table)?.rows.get(id).map(|row| row.version);
            if actual != staged.base {
                return Err(match staged.base {
                    Some(expected) => StoreError::VersionMismatch {
                        table,
                        id: id.clone(),
                        expected,
                        actual,
                    },
                    None => StoreError::DuplicateKey {
                        table,
                        id: id.clone(),
                    },
                });
            }
        }
        Ok(())
    }

    fn install(&mut self, overlay: Overlay) -> usize {
        let count = overlay.staged.len();
        for ((table, id), staged) in overlay.staged {
            let Some(target) = self.tables.get_mut(table) else {
                continue;
            };
            match staged.row {
                Some(row) => {
                    target.rows.insert(id, row);
                }
                None => {
                    target.rows.remove(&id);
                }
            }
        }
        count
    }
}

fn passes_filter(schema: TableSchema, scope: ReadScope, row: &StoredRow) -> bool {
    scope.include_deleted || !schema.soft_delete || !row.is_deleted()
}
