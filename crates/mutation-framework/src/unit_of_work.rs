//! # Unit of Work
//!
//! The transaction boundary. A [`UnitOfWork`] is request-scoped and bound to
//! one acting user. It owns the change tracker, runs the processor pipeline
//! around every physical write, manages at most one explicit transaction, and
//! translates storage version mismatches into
//! [`MutationError::ConcurrencyConflict`].
//!
//! ```text
//! save_changes:  before_save ─▶ write ─▶ after_save (now, or at commit)
//! commit:        store commit ─▶ after_save          (failure: rollback)
//! rollback:      store rollback ─▶ on_rollback       (no after_save)
//! ```
//!
//! Transactions do not nest. Beginning while one is active and committing
//! without one are [`TransactionStateError`]s; rolling back without one is a
//! logged no-op.

use crate::clock::Clock;
use crate::config::FrameworkConfig;
use crate::entity::Entity;
use crate::error::{MutationError, TransactionStateError};
use crate::identity::UserId;
use crate::lock_service::EntityLockService;
use crate::processor::{
    AuditProcessor, LockReleaseProcessor, ProcessorContext, UnitOfWorkProcessor,
};
use crate::registry::CapabilityRegistry;
use crate::repository::Repository;
use crate::store::{EntityStore, ReadScope, TxId};
use crate::tracker::ChangeTracker;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared wiring from which request-scoped units of work are created.
#[derive(Debug, Clone)]
pub struct UnitOfWorkFactory {
    store: Arc<dyn EntityStore>,
    registry: Arc<CapabilityRegistry>,
    clock: Arc<dyn Clock>,
    config: FrameworkConfig,
}

impl UnitOfWorkFactory {
    pub fn new(
        store: Arc<dyn EntityStore>,
        registry: Arc<CapabilityRegistry>,
        clock: Arc<dyn Clock>,
        config: FrameworkConfig,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            config,
        }
    }

    /// Starts a unit of work on behalf of `user`.
    pub fn begin_work(&self, user: UserId) -> UnitOfWork {
        UnitOfWork::new(Arc::clone(&self.store), Arc::clone(&self.clock), user)
    }

    pub fn lock_service(&self) -> EntityLockService {
        EntityLockService::new(Arc::clone(&self.clock))
    }

    /// Repository for `T`. Fails for types missing from the registry.
    pub fn repository<T: Entity>(&self) -> Result<Repository<T>, MutationError> {
        Repository::new(&self.registry, self.lock_service())
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn config(&self) -> &FrameworkConfig {
        &self.config
    }
}

pub struct UnitOfWork {
    store: Arc<dyn EntityStore>,
    clock: Arc<dyn Clock>,
    user: UserId,
    tracker: ChangeTracker,
    processors: Vec<Arc<dyn UnitOfWorkProcessor>>,
    lock_release: Arc<LockReleaseProcessor>,
    transaction: Option<TxId>,
    after_save_pending: bool,
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("user", &self.user)
            .field("tracked", &self.tracker.len())
            .field("processors", &self.processors.len())
            .field("transaction", &self.transaction)
            .finish()
    }
}

impl UnitOfWork {
    pub fn new(store: Arc<dyn EntityStore>, clock: Arc<dyn Clock>, user: UserId) -> Self {
        let lock_release = Arc::new(LockReleaseProcessor::new());
        let processors: Vec<Arc<dyn UnitOfWorkProcessor>> = vec![
            Arc::new(AuditProcessor),
            Arc::clone(&lock_release) as Arc<dyn UnitOfWorkProcessor>,
        ];
        Self {
            store,
            clock,
            user,
            tracker: ChangeTracker::new(),
            processors,
            lock_release,
            transaction: None,
            after_save_pending: false,
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    pub(crate) fn tracker_mut(&mut self) -> &mut ChangeTracker {
        &mut self.tracker
    }

    pub(crate) fn store(&self) -> &dyn EntityStore {
        self.store.as_ref()
    }

    /// Read scope that sees this unit of work's uncommitted writes.
    pub(crate) fn read_scope(&self, include_deleted: bool) -> ReadScope {
        ReadScope {
            include_deleted,
            tx: self.transaction,
        }
    }

    /// Appends a processor after the built-in ones.
    pub fn add_processor(&mut self, processor: Arc<dyn UnitOfWorkProcessor>) {
        self.processors.push(processor);
    }

    /// Releases the lock on `entity` once the next save is durable.
    pub fn release_lock_after_save<T: Entity>(&self, entity: &T) {
        self.lock_release.schedule(entity, self.user);
    }

    pub fn pending_lock_releases(&self) -> usize {
        self.lock_release.pending_count()
    }

    /// Runs before-processors, writes every pending change, then runs
    /// after-processors unless an explicit transaction defers them.
    ///
    /// Returns the number of rows written. A write failure inside an explicit
    /// transaction rolls the transaction back before the error is returned.
    pub async fn save_changes(&mut self) -> Result<usize, MutationError> {
        let now = self.clock.now();
        self.run_before_save(now).await?;

        let written = match self.flush().await {
            Ok(written) => written,
            Err(err) => {
                if self.transaction.is_some() {
                    warn!(error = %err, "Write failed inside transaction; rolling back");
                    self.rollback_quietly().await;
                }
                return Err(err);
            }
        };

        if self.transaction.is_some() {
            self.after_save_pending = true;
            debug!(written, "Saved inside transaction; after-save deferred");
        } else {
            debug!(written, "Saved");
            self.run_after_save(now).await?;
        }
        Ok(written)
    }

    pub async fn begin_transaction(&mut self) -> Result<(), MutationError> {
        if self.transaction.is_some() {
            return Err(TransactionStateError::AlreadyActive.into());
        }
        let tx = self.store.begin().await?;
        self.transaction = Some(tx);
        info!(%tx, user = %self.user, "Transaction started");
        Ok(())
    }

    /// Commits the active transaction, then runs the deferred after-processors.
    ///
    /// On a failed commit the transaction is rolled back before the original
    /// error is returned.
    pub async fn commit_transaction(&mut self) -> Result<(), MutationError> {
        let tx = self.transaction.ok_or(TransactionStateError::NotActive)?;

        if let Err(err) = self.store.commit(tx).await {
            let err = MutationError::from_store(err);
            warn!(%tx, error = %err, "Commit failed; rolling back");
            self.rollback_quietly().await;
            return Err(err);
        }

        self.transaction = None;
        info!(%tx, "Transaction committed");

        if std::mem::take(&mut self.after_save_pending) {
            self.run_after_save(self.clock.now()).await?;
        }
        Ok(())
    }

    /// Rolls back the active transaction and discards tracked changes. No
    /// after-processors run.
    pub async fn rollback_transaction(&mut self) -> Result<(), MutationError> {
        let Some(tx) = self.transaction.take() else {
            debug!("Rollback requested without an active transaction");
            return Ok(());
        };
        self.after_save_pending = false;
        let result = self.store.rollback(tx).await;
        self.tracker.clear();
        for processor in self.processors.clone() {
            processor.on_rollback().await;
        }
        info!(%tx, "Transaction rolled back");
        result.map_err(MutationError::from)
    }

    async fn rollback_quietly(&mut self) {
        if let Err(err) = self.rollback_transaction().await {
            warn!(error = %err, "Rollback after failure did not complete");
        }
    }

    async fn run_before_save(&mut self, now: DateTime<Utc>) -> Result<(), MutationError> {
        let mut ctx = ProcessorContext::new(self.user, now, &mut self.tracker);
        for processor in &self.processors {
            processor.before_save(&mut ctx).await?;
        }
        Ok(())
    }

    /// After-processors may dirty entries (released locks); those are written
    /// without running the before-processors again.
    async fn run_after_save(&mut self, now: DateTime<Utc>) -> Result<(), MutationError> {
        {
            let mut ctx = ProcessorContext::new(self.user, now, &mut self.tracker);
            for processor in &self.processors {
                processor.after_save(&mut ctx).await?;
            }
        }
        let flushed = self.flush().await?;
        if flushed > 0 {
            debug!(flushed, "Persisted after-save changes");
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<usize, MutationError> {
        let writes = self.tracker.pending_writes()?;
        if writes.is_empty() {
            return Ok(0);
        }
        let results = self
            .store
            .apply(writes, self.transaction)
            .await
            .map_err(MutationError::from_store)?;
        self.tracker.accept_changes(&results);
        Ok(results.len())
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if let Some(tx) = self.transaction.take() {
            warn!(%tx, user = %self.user, "Unit of work dropped with an active transaction; abandoning");
            self.store.abandon(tx);
        }
    }
}
