use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use mutation_framework::mock::{MockStore, StoreCall};
use mutation_framework::store::{StoreActor, TxId, WriteOp, WriteResult};
use mutation_framework::{
    Auditable, AuditingBehavior, Capabilities, CapabilityRegistry, ConcurrencyToken, Entity,
    EntryState, FrameworkConfig, LockOutcome, Lockable, LockingBehavior, ManualClock,
    MutationError, ProcessorContext, ReadOptions, Repository, SoftDeletable, SoftDeleteBehavior,
    StoreError, TrackedEntity, TransactionStateError, UnitOfWork, UnitOfWorkFactory,
    UnitOfWorkProcessor, UserId, Versioned,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

// --- Test Entities ---

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Document {
    id: Uuid,
    title: String,
    #[serde(flatten)]
    lock: LockingBehavior,
    #[serde(flatten)]
    audit: AuditingBehavior,
    #[serde(flatten)]
    tombstone: SoftDeleteBehavior,
    row_version: ConcurrencyToken,
}

impl Document {
    fn new(title: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.to_string(),
            lock: LockingBehavior::default(),
            audit: AuditingBehavior::default(),
            tombstone: SoftDeleteBehavior::default(),
            row_version: ConcurrencyToken::default(),
        }
    }
}

impl Lockable for Document {
    fn locking(&self) -> &LockingBehavior {
        &self.lock
    }
}

impl Auditable for Document {
    fn auditing(&self) -> &AuditingBehavior {
        &self.audit
    }
}

impl SoftDeletable for Document {
    fn soft_delete(&self) -> &SoftDeleteBehavior {
        &self.tombstone
    }
}

impl Versioned for Document {
    fn row_version(&self) -> ConcurrencyToken {
        self.row_version
    }

    fn set_row_version(&mut self, version: ConcurrencyToken) {
        self.row_version = version;
    }
}

impl Entity for Document {
    type Id = Uuid;
    const ENTITY_TYPE: &'static str = "Document";

    fn id(&self) -> &Uuid {
        &self.id
    }

    fn capabilities() -> Capabilities<Self> {
        Capabilities::none()
            .lockable()
            .auditable()
            .soft_deletable()
            .versioned()
    }
}

/// No capabilities at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Label {
    id: u32,
    text: String,
}

impl Entity for Label {
    type Id = u32;
    const ENTITY_TYPE: &'static str = "Label";

    fn id(&self) -> &u32 {
        &self.id
    }
}

/// Never registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Orphan {
    id: u32,
}

impl Entity for Orphan {
    type Id = u32;
    const ENTITY_TYPE: &'static str = "Orphan";

    fn id(&self) -> &u32 {
        &self.id
    }
}

// --- Harness ---

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

fn registry() -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry.register::<Document>().register::<Label>();
    registry
}

struct Harness {
    factory: UnitOfWorkFactory,
    clock: Arc<ManualClock>,
    docs: Repository<Document>,
}

impl Harness {
    fn new() -> Self {
        let registry = registry();
        let (actor, client) = StoreActor::new(16, &registry);
        tokio::spawn(actor.run());
        let clock = Arc::new(ManualClock::starting_at(t0()));
        let factory = UnitOfWorkFactory::new(
            Arc::new(client),
            Arc::new(registry),
            clock.clone(),
            FrameworkConfig::default(),
        );
        let docs = factory.repository::<Document>().unwrap();
        Self {
            factory,
            clock,
            docs,
        }
    }

    async fn seed(&self, user: UserId, title: &str) -> Uuid {
        let mut uow = self.factory.begin_work(user);
        let doc = Document::new(title);
        self.docs.add(&mut uow, &doc);
        uow.save_changes().await.unwrap();
        doc.id
    }

    async fn load(&self, id: Uuid, options: ReadOptions) -> Option<Document> {
        let mut uow = self.factory.begin_work(UserId::new());
        self.docs.get_by_id(&mut uow, &id, options).await.unwrap()
    }
}

// --- Locking ---

#[tokio::test]
async fn test_lock_conflict_then_takeover_after_expiry() {
    let h = Harness::new();
    let alice = UserId::new();
    let bob = UserId::new();
    let id = h.seed(alice, "spec").await;

    // Alice opens the document for edit at T0 and persists the lock.
    let mut alice_uow = h.factory.begin_work(alice);
    h.docs
        .get_by_id_or_err(&mut alice_uow, &id, ReadOptions::for_edit())
        .await
        .unwrap();
    alice_uow.save_changes().await.unwrap();

    // Bob tries at T0+5.
    h.clock.advance(Duration::minutes(5));
    let mut bob_uow = h.factory.begin_work(bob);
    let mut doc = h
        .docs
        .get_by_id_or_err(&mut bob_uow, &id, ReadOptions::tracked())
        .await
        .unwrap();
    doc.title = "bob's edit".into();
    let err = h.docs.update(&mut bob_uow, &doc).unwrap_err();
    match err {
        MutationError::LockConflict {
            entity_type,
            holder_id,
            locked_at,
            ..
        } => {
            assert_eq!(entity_type, "Document");
            assert_eq!(holder_id, alice);
            assert_eq!(locked_at, t0());
        }
        other => panic!("expected lock conflict, got {other:?}"),
    }
    assert!(!bob_uow.tracker().has_changes());

    // At T0+16 the lock has expired and Bob takes it over.
    h.clock.advance(Duration::minutes(11));
    h.docs.update(&mut bob_uow, &doc).unwrap();
    bob_uow.save_changes().await.unwrap();

    let stored = h.load(id, ReadOptions::detached()).await.unwrap();
    let lock = stored.lock.snapshot();
    assert_eq!(lock.holder_id(), Some(bob));
    assert_eq!(lock.locked_at(), Some(t0() + Duration::minutes(16)));
    assert_eq!(stored.title, "bob's edit");
}

#[tokio::test]
async fn test_holder_update_refreshes_lock() {
    let h = Harness::new();
    let alice = UserId::new();
    let id = h.seed(alice, "draft").await;

    let mut uow = h.factory.begin_work(alice);
    let mut doc = h
        .docs
        .get_by_id_or_err(&mut uow, &id, ReadOptions::for_edit())
        .await
        .unwrap();
    assert_eq!(doc.lock.snapshot().locked_at(), Some(t0()));

    h.clock.advance(Duration::minutes(10));
    doc.title = "revised".into();
    h.docs.update(&mut uow, &doc).unwrap();
    assert_eq!(
        doc.lock.snapshot().locked_at(),
        Some(t0() + Duration::minutes(10))
    );
    uow.save_changes().await.unwrap();

    let stored = h.load(id, ReadOptions::detached()).await.unwrap();
    assert_eq!(stored.lock.snapshot().holder_id(), Some(alice));
}

#[tokio::test]
async fn test_unlock_by_other_user_leaves_lock_intact() {
    let h = Harness::new();
    let alice = UserId::new();
    let bob = UserId::new();
    let id = h.seed(alice, "report").await;

    let mut alice_uow = h.factory.begin_work(alice);
    let doc = h
        .docs
        .get_by_id_or_err(&mut alice_uow, &id, ReadOptions::tracked())
        .await
        .unwrap();
    assert_eq!(
        h.docs.lock(&mut alice_uow, &doc).unwrap(),
        Some(LockOutcome::Acquired)
    );
    alice_uow.save_changes().await.unwrap();

    let mut bob_uow = h.factory.begin_work(bob);
    let seen_by_bob = h
        .docs
        .get_by_id_or_err(&mut bob_uow, &id, ReadOptions::tracked())
        .await
        .unwrap();
    assert!(h
        .docs
        .lock_service()
        .is_locked_by_another_user(&seen_by_bob, bob));
    assert!(matches!(
        h.docs.unlock(&mut bob_uow, &seen_by_bob),
        Err(MutationError::LockConflict { .. })
    ));
    assert_eq!(seen_by_bob.lock.snapshot().holder_id(), Some(alice));

    // The tracked instance carries the version from the last save.
    let doc = h
        .docs
        .get_by_id_or_err(&mut alice_uow, &id, ReadOptions::tracked())
        .await
        .unwrap();
    h.docs.unlock(&mut alice_uow, &doc).unwrap();
    alice_uow.save_changes().await.unwrap();
    let stored = h.load(id, ReadOptions::detached()).await.unwrap();
    assert!(!stored.lock.snapshot().is_set());
}

#[tokio::test]
async fn test_unlocking_a_free_lock_writes_nothing() {
    let h = Harness::new();
    let alice = UserId::new();
    let id = h.seed(alice, "idle").await;
    let before = h.load(id, ReadOptions::detached()).await.unwrap().row_version;

    let mut uow = h.factory.begin_work(UserId::new());
    let doc = h
        .docs
        .get_by_id_or_err(&mut uow, &id, ReadOptions::tracked())
        .await
        .unwrap();
    h.docs.unlock(&mut uow, &doc).unwrap();
    assert_eq!(uow.save_changes().await.unwrap(), 0);

    let stored = h.load(id, ReadOptions::detached()).await.unwrap();
    assert_eq!(stored.row_version, before);
}

#[tokio::test]
async fn test_force_unlock_clears_foreign_lock() {
    let h = Harness::new();
    let alice = UserId::new();
    let admin = UserId::new();
    let id = h.seed(alice, "stuck").await;

    let mut alice_uow = h.factory.begin_work(alice);
    h.docs
        .get_by_id(&mut alice_uow, &id, ReadOptions::for_edit())
        .await
        .unwrap();
    alice_uow.save_changes().await.unwrap();

    let mut admin_uow = h.factory.begin_work(admin);
    let doc = h
        .docs
        .get_by_id_or_err(&mut admin_uow, &id, ReadOptions::tracked())
        .await
        .unwrap();
    assert!(h.docs.force_unlock(&mut admin_uow, &doc));
    assert!(!h.docs.force_unlock(&mut admin_uow, &doc));
    admin_uow.save_changes().await.unwrap();

    let stored = h.load(id, ReadOptions::detached()).await.unwrap();
    assert!(h.docs.lock_status(&stored).is_some_and(|lock| !lock.is_set()));
}

#[tokio::test]
async fn test_save_and_release_unlocks_after_durable_save() {
    let h = Harness::new();
    let alice = UserId::new();
    let id = h.seed(alice, "memo").await;

    let mut uow = h.factory.begin_work(alice);
    let mut doc = h
        .docs
        .get_by_id_or_err(&mut uow, &id, ReadOptions::for_edit())
        .await
        .unwrap();
    doc.title = "final memo".into();
    h.docs.save_and_release(&mut uow, &doc).unwrap();
    assert_eq!(uow.pending_lock_releases(), 1);

    uow.save_changes().await.unwrap();
    assert_eq!(uow.pending_lock_releases(), 0);

    let stored = h.load(id, ReadOptions::detached()).await.unwrap();
    assert_eq!(stored.title, "final memo");
    assert!(!stored.lock.snapshot().is_set());
}

#[tokio::test]
async fn test_entities_without_lock_pass_trivially() {
    let h = Harness::new();
    let labels = h.factory.repository::<Label>().unwrap();
    let mut uow = h.factory.begin_work(UserId::new());
    let label = Label {
        id: 7,
        text: "urgent".into(),
    };
    labels.add(&mut uow, &label);
    uow.save_changes().await.unwrap();

    assert_eq!(labels.lock(&mut uow, &label).unwrap(), None);
    labels.update(&mut uow, &label).unwrap();
    assert!(labels.lock_status(&label).is_none());
    assert!(!labels.force_unlock(&mut uow, &label));
    uow.save_changes().await.unwrap();
    assert!(labels.exists(&mut uow, &7).await.unwrap());
}

#[tokio::test]
async fn test_unregistered_type_is_rejected() {
    let h = Harness::new();
    let err = h.factory.repository::<Orphan>().unwrap_err();
    assert!(matches!(
        err,
        MutationError::Unregistered {
            entity_type: "Orphan"
        }
    ));
}

// --- Optimistic concurrency ---

#[tokio::test]
async fn test_stale_writer_gets_concurrency_conflict() {
    let h = Harness::new();
    let id = h.seed(UserId::new(), "v0").await;

    let mut first = h.factory.begin_work(UserId::new());
    let mut second = h.factory.begin_work(UserId::new());
    let mut a = h
        .docs
        .get_by_id_or_err(&mut first, &id, ReadOptions::tracked())
        .await
        .unwrap();
    let mut b = h
        .docs
        .get_by_id_or_err(&mut second, &id, ReadOptions::tracked())
        .await
        .unwrap();
    let loaded_version = a.row_version;
    assert_eq!(loaded_version, b.row_version);

    a.title = "first".into();
    h.docs.update(&mut first, &a).unwrap();
    first.save_changes().await.unwrap();

    b.title = "second".into();
    h.docs.update(&mut second, &b).unwrap();
    let err = second.save_changes().await.unwrap_err();
    match err {
        MutationError::ConcurrencyConflict {
            entity_type,
            client_version,
            stored_version,
            ..
        } => {
            assert_eq!(entity_type, "Document");
            assert_eq!(client_version, loaded_version);
            assert!(stored_version.is_some_and(|v| v > loaded_version));
        }
        other => panic!("expected concurrency conflict, got {other:?}"),
    }

    let stored = h.load(id, ReadOptions::detached()).await.unwrap();
    assert_eq!(stored.title, "first");
}

#[tokio::test]
async fn test_tracked_versions_follow_saves() {
    let h = Harness::new();
    let mut uow = h.factory.begin_work(UserId::new());
    let doc = Document::new("counter");
    h.docs.add(&mut uow, &doc);
    uow.save_changes().await.unwrap();

    let (tracked, state) = uow.tracker().get::<Document>(&doc.id).unwrap();
    assert_eq!(state, EntryState::Unchanged);
    let v1 = tracked.row_version;
    assert!(!v1.is_unsaved());

    let mut edited = tracked.clone();
    edited.title = "counter 2".into();
    h.docs.update(&mut uow, &edited).unwrap();
    uow.save_changes().await.unwrap();
    let (tracked, _) = uow.tracker().get::<Document>(&doc.id).unwrap();
    assert!(tracked.row_version > v1);
}

// --- Soft delete ---

#[tokio::test]
async fn test_soft_delete_and_restore_visibility() {
    let h = Harness::new();
    let user = UserId::new();
    let id = h.seed(user, "ephemeral").await;
    h.seed(user, "keeper").await;

    let mut uow = h.factory.begin_work(user);
    let doc = h
        .docs
        .get_by_id_or_err(&mut uow, &id, ReadOptions::tracked())
        .await
        .unwrap();
    assert!(h.docs.soft_delete(&mut uow, &doc).unwrap());
    uow.save_changes().await.unwrap();

    let mut reader = h.factory.begin_work(UserId::new());
    assert!(h
        .docs
        .get_by_id(&mut reader, &id, ReadOptions::detached())
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        h.docs.count(&mut reader, ReadOptions::detached()).await.unwrap(),
        1
    );
    let everything = h
        .docs
        .get_all(&mut reader, ReadOptions::detached().with_soft_deleted())
        .await
        .unwrap();
    assert_eq!(everything.len(), 2);
    let tombstoned = everything.iter().find(|d| d.id == id).unwrap();
    let info = tombstoned.tombstone.snapshot();
    assert!(info.is_deleted());
    assert_eq!(info.deleted_by(), Some(user));
    assert_eq!(info.deleted_at(), Some(t0()));

    let mut restorer = h.factory.begin_work(user);
    let doc = h
        .docs
        .get_by_id_or_err(
            &mut restorer,
            &id,
            ReadOptions::tracked().with_soft_deleted(),
        )
        .await
        .unwrap();
    assert!(h.docs.restore(&mut restorer, &doc).unwrap());
    restorer.save_changes().await.unwrap();

    let back = h.load(id, ReadOptions::detached()).await.unwrap();
    assert!(!back.tombstone.is_deleted());
    let found = h
        .docs
        .find(&mut reader, ReadOptions::detached(), |d| d.title == "ephemeral")
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn test_get_by_id_or_err_reports_not_found() {
    let h = Harness::new();
    let mut uow = h.factory.begin_work(UserId::new());
    let missing = Uuid::new_v4();
    let err = h
        .docs
        .get_by_id_or_err(&mut uow, &missing, ReadOptions::tracked())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MutationError::NotFound { entity_type: "Document", id } if id == missing.to_string()
    ));
}

// --- Auditing ---

#[tokio::test]
async fn test_audit_created_once_modified_each_save() {
    let h = Harness::new();
    let alice = UserId::new();
    let bob = UserId::new();
    let id = h.seed(alice, "ledger").await;

    let created = h.load(id, ReadOptions::detached()).await.unwrap();
    let audit = created.audit.snapshot();
    assert_eq!(audit.created_by_user_id, Some(alice));
    assert_eq!(audit.created_at_utc, Some(t0()));
    assert_eq!(audit.modified_at_utc, None);

    h.clock.advance(Duration::hours(2));
    let mut uow = h.factory.begin_work(bob);
    let mut doc = h
        .docs
        .get_by_id_or_err(&mut uow, &id, ReadOptions::tracked())
        .await
        .unwrap();
    doc.title = "ledger v2".into();
    h.docs.update(&mut uow, &doc).unwrap();
    uow.save_changes().await.unwrap();

    let modified = h.load(id, ReadOptions::detached()).await.unwrap();
    let audit = modified.audit.snapshot();
    assert_eq!(audit.created_by_user_id, Some(alice));
    assert_eq!(audit.created_at_utc, Some(t0()));
    assert_eq!(audit.modified_by_user_id, Some(bob));
    assert_eq!(audit.modified_at_utc, Some(t0() + Duration::hours(2)));
}

// --- Transactions ---

#[tokio::test]
async fn test_transaction_state_errors() {
    let h = Harness::new();
    let mut uow = h.factory.begin_work(UserId::new());

    assert!(matches!(
        uow.commit_transaction().await,
        Err(MutationError::TransactionState(
            TransactionStateError::NotActive
        ))
    ));
    uow.rollback_transaction().await.unwrap();

    uow.begin_transaction().await.unwrap();
    assert!(matches!(
        uow.begin_transaction().await,
        Err(MutationError::TransactionState(
            TransactionStateError::AlreadyActive
        ))
    ));
    uow.rollback_transaction().await.unwrap();
    assert!(!uow.in_transaction());
}

#[tokio::test]
async fn test_transaction_commit_makes_writes_visible() {
    let h = Harness::new();
    let user = UserId::new();
    let mut uow = h.factory.begin_work(user);
    uow.begin_transaction().await.unwrap();

    let first = Document::new("one");
    let second = Document::new("two");
    h.docs.add(&mut uow, &first);
    uow.save_changes().await.unwrap();
    h.docs.add(&mut uow, &second);
    uow.save_changes().await.unwrap();

    // Visible inside the transaction, not outside.
    assert_eq!(
        h.docs.count(&mut uow, ReadOptions::detached()).await.unwrap(),
        2
    );
    assert!(h.load(first.id, ReadOptions::detached()).await.is_none());

    uow.commit_transaction().await.unwrap();
    assert!(h.load(first.id, ReadOptions::detached()).await.is_some());
    assert!(h.load(second.id, ReadOptions::detached()).await.is_some());
}

#[tokio::test]
async fn test_conflict_inside_transaction_rolls_back_without_lock_release() {
    let h = Harness::new();
    let user = UserId::new();
    let first_id = h.seed(user, "first").await;
    let second_id = h.seed(user, "second").await;

    // The first document is locked by the acting user before the transaction.
    let mut uow = h.factory.begin_work(user);
    h.docs
        .get_by_id_or_err(&mut uow, &first_id, ReadOptions::for_edit())
        .await
        .unwrap();
    let mut second = h
        .docs
        .get_by_id_or_err(&mut uow, &second_id, ReadOptions::tracked())
        .await
        .unwrap();
    uow.save_changes().await.unwrap();
    let mut first = uow.tracker().get::<Document>(&first_id).unwrap().0.clone();

    // Someone else moves the second document's version.
    let mut other = h.factory.begin_work(UserId::new());
    let mut theirs = h
        .docs
        .get_by_id_or_err(&mut other, &second_id, ReadOptions::tracked())
        .await
        .unwrap();
    theirs.title = "theirs".into();
    h.docs.update(&mut other, &theirs).unwrap();
    other.save_changes().await.unwrap();

    uow.begin_transaction().await.unwrap();
    first.title = "first (tx)".into();
    h.docs.save_and_release(&mut uow, &first).unwrap();
    uow.save_changes().await.unwrap();

    second.title = "second (tx)".into();
    h.docs.update(&mut uow, &second).unwrap();
    let err = uow.save_changes().await.unwrap_err();
    assert!(matches!(err, MutationError::ConcurrencyConflict { .. }));

    assert!(!uow.in_transaction());
    assert!(uow.tracker().is_empty());
    assert_eq!(uow.pending_lock_releases(), 0);

    let stored_first = h.load(first_id, ReadOptions::detached()).await.unwrap();
    assert_eq!(stored_first.title, "first");
    assert_eq!(stored_first.lock.snapshot().holder_id(), Some(user));
    let stored_second = h.load(second_id, ReadOptions::detached()).await.unwrap();
    assert_eq!(stored_second.title, "theirs");
}

#[tokio::test]
async fn test_commit_conflict_triggers_automatic_rollback() {
    let h = Harness::new();
    let user = UserId::new();
    let id = h.seed(user, "shared").await;

    let mut uow = h.factory.begin_work(user);
    uow.begin_transaction().await.unwrap();
    let mut mine = h
        .docs
        .get_by_id_or_err(&mut uow, &id, ReadOptions::tracked())
        .await
        .unwrap();
    mine.title = "mine".into();
    h.docs.update(&mut uow, &mine).unwrap();
    uow.save_changes().await.unwrap();

    // A concurrent writer commits first; its copy predates our lock claim.
    let mut other = h.factory.begin_work(UserId::new());
    let mut theirs = h
        .docs
        .get_by_id_or_err(&mut other, &id, ReadOptions::tracked())
        .await
        .unwrap();
    theirs.title = "theirs".into();
    h.docs.update(&mut other, &theirs).unwrap();
    other.save_changes().await.unwrap();

    let err = uow.commit_transaction().await.unwrap_err();
    assert!(matches!(err, MutationError::ConcurrencyConflict { .. }));
    assert!(!uow.in_transaction());

    let stored = h.load(id, ReadOptions::detached()).await.unwrap();
    assert_eq!(stored.title, "theirs");
}

// --- Processor pipeline (mock store) ---

fn versioned_result(id: &str, version: u64) -> Vec<WriteResult> {
    vec![WriteResult {
        table: "Document",
        id: id.to_string(),
        version: Some(ConcurrencyToken(version)),
    }]
}

fn mock_uow(mock: &MockStore, user: UserId) -> UnitOfWork {
    let clock = Arc::new(ManualClock::starting_at(t0()));
    UnitOfWork::new(Arc::new(mock.client()), clock, user)
}

#[tokio::test]
async fn test_audit_stamps_are_part_of_the_write() {
    let mock = MockStore::new();
    let user = UserId::new();
    let doc = Document::new("stamped");
    mock.expect_apply()
        .return_ok(versioned_result(&doc.id.to_string(), 1));

    let registry = registry();
    let docs = Repository::<Document>::new(
        &registry,
        mutation_framework::EntityLockService::new(Arc::new(ManualClock::starting_at(t0()))),
    )
    .unwrap();
    let mut uow = mock_uow(&mock, user);
    docs.add(&mut uow, &doc);
    uow.save_changes().await.unwrap();

    let calls = mock.received();
    assert_eq!(calls.len(), 1);
    let StoreCall::Apply { writes, tx } = &calls[0] else {
        panic!("expected apply, got {:?}", calls[0]);
    };
    assert_eq!(*tx, None);
    let WriteOp::Insert { data } = &writes[0].op else {
        panic!("expected insert");
    };
    assert_eq!(data["created_by_user_id"], serde_json::json!(user));
    assert_eq!(data["is_deleted"], false);
    mock.verify();
}

#[tokio::test]
async fn test_retried_insert_carries_only_creation_stamps() {
    let mock = MockStore::new();
    let user = UserId::new();
    let doc = Document::new("retried");
    mock.expect_apply()
        .return_err(StoreError::Unavailable("connection reset".into()));
    mock.expect_apply()
        .return_ok(versioned_result(&doc.id.to_string(), 1));

    let clock = Arc::new(ManualClock::starting_at(t0()));
    let mut uow = UnitOfWork::new(Arc::new(mock.client()), clock.clone(), user);
    let registry = registry();
    let docs = Repository::<Document>::new(
        &registry,
        mutation_framework::EntityLockService::new(clock.clone()),
    )
    .unwrap();

    docs.add(&mut uow, &doc);
    assert!(uow.save_changes().await.is_err());
    clock.advance(Duration::minutes(3));
    uow.save_changes().await.unwrap();

    let calls = mock.received();
    assert_eq!(calls.len(), 2);
    let StoreCall::Apply { writes, .. } = &calls[1] else {
        panic!("expected apply, got {:?}", calls[1]);
    };
    let WriteOp::Insert { data } = &writes[0].op else {
        panic!("expected insert");
    };
    assert_eq!(
        data["created_at_utc"],
        serde_json::json!(t0() + Duration::minutes(3))
    );
    assert_eq!(data["created_by_user_id"], serde_json::json!(user));
    assert!(data["modified_at_utc"].is_null());
    assert!(data["modified_by_user_id"].is_null());
    mock.verify();
}

#[tokio::test]
async fn test_commit_failure_rolls_back_and_skips_after_save() {
    let mock = MockStore::new();
    let user = UserId::new();
    let doc = Document::new("doomed");
    mock.expect_begin().return_ok(TxId(1));
    mock.expect_apply()
        .return_ok(versioned_result(&doc.id.to_string(), 1));
    mock.expect_commit()
        .return_err(StoreError::Unavailable("disk full".into()));
    mock.expect_rollback().return_ok(());

    let mut uow = mock_uow(&mock, user);
    let registry = registry();
    let docs = Repository::<Document>::new(
        &registry,
        mutation_framework::EntityLockService::new(Arc::new(ManualClock::starting_at(t0()))),
    )
    .unwrap();

    uow.begin_transaction().await.unwrap();
    docs.add(&mut uow, &doc);
    docs.lock(&mut uow, &doc).unwrap();
    uow.release_lock_after_save(&doc);
    uow.save_changes().await.unwrap();
    assert_eq!(uow.pending_lock_releases(), 1);

    let err = uow.commit_transaction().await.unwrap_err();
    assert!(matches!(
        err,
        MutationError::Store(StoreError::Unavailable(_))
    ));
    assert!(!uow.in_transaction());
    assert_eq!(uow.pending_lock_releases(), 0);

    let calls = mock.received();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[0], StoreCall::Begin);
    assert!(matches!(&calls[1], StoreCall::Apply { tx: Some(TxId(1)), .. }));
    assert_eq!(calls[2], StoreCall::Commit(TxId(1)));
    assert_eq!(calls[3], StoreCall::Rollback(TxId(1)));
    // No follow-up write: the lock release never ran.
    assert_eq!(calls.iter().filter(|c| c.is_apply()).count(), 1);
    mock.verify();
}

#[tokio::test]
async fn test_dropping_unit_of_work_abandons_transaction() {
    let mock = MockStore::new();
    mock.expect_begin().return_ok(TxId(3));
    mock.expect_rollback().return_ok(());

    let mut uow = mock_uow(&mock, UserId::new());
    uow.begin_transaction().await.unwrap();
    drop(uow);

    for _ in 0..50 {
        if mock.received().len() == 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(mock.received()[1], StoreCall::Rollback(TxId(3)));
    mock.verify();
}

/// Records what it sees so ordering can be asserted.
#[derive(Default)]
struct RecordingProcessor {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl UnitOfWorkProcessor for RecordingProcessor {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn before_save(&self, ctx: &mut ProcessorContext<'_>) -> Result<(), MutationError> {
        for entry in ctx.entries() {
            let stamped = entry
                .entity()
                .auditing_behavior()
                .is_some_and(|audit| audit.snapshot().is_created());
            self.seen
                .lock()
                .push(format!("before:{}:{stamped}", entry.entity_type()));
        }
        Ok(())
    }

    async fn after_save(&self, _ctx: &mut ProcessorContext<'_>) -> Result<(), MutationError> {
        self.seen.lock().push("after".to_string());
        Ok(())
    }
}

#[tokio::test]
async fn test_custom_processor_runs_after_builtins() {
    let h = Harness::new();
    let recorder = Arc::new(RecordingProcessor::default());
    let mut uow = h.factory.begin_work(UserId::new());
    uow.add_processor(recorder.clone());

    h.docs.add(&mut uow, &Document::new("observed"));
    uow.save_changes().await.unwrap();

    assert_eq!(
        *recorder.seen.lock(),
        vec!["before:Document:true".to_string(), "after".to_string()]
    );
}

/// Fails every save.
struct RejectingProcessor;

#[async_trait]
impl UnitOfWorkProcessor for RejectingProcessor {
    fn name(&self) -> &'static str {
        "rejecting"
    }

    async fn before_save(&self, _ctx: &mut ProcessorContext<'_>) -> Result<(), MutationError> {
        Err(MutationError::Processor {
            processor: self.name(),
            message: "read-only mode".into(),
        })
    }
}

#[tokio::test]
async fn test_processor_failure_aborts_save() {
    let h = Harness::new();
    let mut uow = h.factory.begin_work(UserId::new());
    uow.add_processor(Arc::new(RejectingProcessor));

    let doc = Document::new("blocked");
    h.docs.add(&mut uow, &doc);
    let err = uow.save_changes().await.unwrap_err();
    assert!(matches!(
        err,
        MutationError::Processor {
            processor: "rejecting",
            ..
        }
    ));
    assert!(h.load(doc.id, ReadOptions::detached()).await.is_none());
}
