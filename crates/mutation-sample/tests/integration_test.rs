use chrono::{Duration, TimeZone, Utc};
use mutation_framework::{FrameworkConfig, ManualClock, MutationError, UserId};
use mutation_sample::error::{CustomerError, OrderError, ProductError};
use mutation_sample::lifecycle::CommerceSystem;
use mutation_sample::model::{
    CustomerCreate, CustomerId, OrderCreate, OrderId, OrderLine, OrderStatus, ProductCreate,
    ProductId,
};
use std::sync::Arc;

struct Fixture {
    system: CommerceSystem,
    clock: Arc<ManualClock>,
    alice: UserId,
    bob: UserId,
    customer: CustomerId,
    widget: ProductId,
    gadget: ProductId,
}

async fn fixture() -> Fixture {
    fixture_with(FrameworkConfig::default()).await
}

async fn fixture_with(config: FrameworkConfig) -> Fixture {
    let clock = Arc::new(ManualClock::starting_at(
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
    ));
    let system = CommerceSystem::with_config(config, clock.clone()).expect("system starts");
    let alice = UserId::new();
    let bob = UserId::new();

    let customer = system
        .customers
        .register(
            alice,
            CustomerCreate {
                name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
            },
        )
        .await
        .unwrap();
    let widget = system
        .products
        .create(
            alice,
            ProductCreate {
                name: "Widget".to_string(),
                price: 25.0,
                stock: 20,
            },
        )
        .await
        .unwrap();
    let gadget = system
        .products
        .create(
            alice,
            ProductCreate {
                name: "Gadget".to_string(),
                price: 99.5,
                stock: 3,
            },
        )
        .await
        .unwrap();

    Fixture {
        system,
        clock,
        alice,
        bob,
        customer,
        widget,
        gadget,
    }
}

impl Fixture {
    async fn place(&self, user: UserId, lines: &[(ProductId, u32)]) -> Result<OrderId, OrderError> {
        self.system
            .orders
            .place_order(
                user,
                OrderCreate {
                    customer_id: self.customer,
                    lines: lines
                        .iter()
                        .map(|&(product_id, quantity)| OrderLine {
                            product_id,
                            quantity,
                        })
                        .collect(),
                },
            )
            .await
    }

    async fn stock(&self, id: ProductId) -> u32 {
        self.system.products.get(self.alice, id).await.unwrap().stock
    }
}

fn is_lock_conflict(err: &OrderError) -> bool {
    matches!(err, OrderError::Mutation(MutationError::LockConflict { .. }))
}

// --- Placement ---

#[tokio::test]
async fn test_place_order_writes_order_lines_and_stock() {
    let f = fixture().await;
    let order_id = f.place(f.alice, &[(f.widget, 4), (f.gadget, 1)]).await.unwrap();

    let order = f.system.orders.get(f.alice, order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Placed);
    assert_eq!(order.customer_id, f.customer);
    assert!((order.total - 199.5).abs() < f64::EPSILON);

    let lines = f.system.orders.lines_of_order(f.alice, order_id).await.unwrap();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|line| line.order_id == order_id));

    assert_eq!(f.stock(f.widget).await, 16);
    assert_eq!(f.stock(f.gadget).await, 2);

    // Product locks taken for the reservation are released after commit.
    let lock = f
        .system
        .products
        .lock_status(f.alice, f.widget)
        .await
        .unwrap()
        .unwrap();
    assert!(!lock.is_set());

    f.system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_insufficient_stock_rolls_back_every_line() {
    let f = fixture().await;
    let err = f
        .place(f.alice, &[(f.widget, 5), (f.gadget, 4)])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrderError::InsufficientStock {
            requested: 4,
            available: 3,
            ..
        }
    ));

    assert_eq!(f.stock(f.widget).await, 20);
    assert_eq!(f.stock(f.gadget).await, 3);
    let mut uow = f.system.factory().begin_work(f.alice);
    let orders = f
        .system
        .factory()
        .repository::<mutation_sample::model::Order>()
        .unwrap();
    assert_eq!(
        orders
            .count(&mut uow, mutation_framework::ReadOptions::detached())
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_order_validation() {
    let f = fixture().await;
    assert!(matches!(
        f.place(f.alice, &[]).await,
        Err(OrderError::EmptyOrder)
    ));
    assert!(matches!(
        f.place(f.alice, &[(f.widget, 0)]).await,
        Err(OrderError::InvalidQuantity(id)) if id == f.widget
    ));

    let missing = ProductId::new();
    assert!(matches!(
        f.place(f.alice, &[(missing, 1)]).await,
        Err(OrderError::Mutation(MutationError::NotFound { entity_type: "Product", .. }))
    ));
}

#[tokio::test]
async fn test_deactivated_customer_cannot_order() {
    let f = fixture().await;
    assert!(f.system.customers.deactivate(f.alice, f.customer).await.unwrap());

    let err = f.place(f.alice, &[(f.widget, 1)]).await.unwrap_err();
    assert!(matches!(err, OrderError::UnknownCustomer(id) if id == f.customer));

    assert!(f.system.customers.restore(f.alice, f.customer).await.unwrap());
    f.place(f.alice, &[(f.widget, 1)]).await.unwrap();
}

// --- Editing and locks ---

#[tokio::test]
async fn test_second_editor_is_rejected_until_lock_expires() {
    let f = fixture().await;
    let order_id = f.place(f.alice, &[(f.widget, 1)]).await.unwrap();

    f.system.orders.open_for_edit(f.alice, order_id).await.unwrap();

    f.clock.advance(Duration::minutes(5));
    let err = f
        .system
        .orders
        .open_for_edit(f.bob, order_id)
        .await
        .unwrap_err();
    assert!(is_lock_conflict(&err));
    assert!(err.is_conflict());

    let err = f
        .system
        .orders
        .update_status(f.bob, order_id, OrderStatus::Confirmed)
        .await
        .unwrap_err();
    assert!(is_lock_conflict(&err));

    f.clock.advance(Duration::minutes(11));
    f.system.orders.open_for_edit(f.bob, order_id).await.unwrap();
    let lock = f
        .system
        .orders
        .lock_status(f.bob, order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lock.holder_id(), Some(f.bob));
    assert_eq!(lock.locked_at(), Some(f.clock_now()));
}

impl Fixture {
    fn clock_now(&self) -> chrono::DateTime<Utc> {
        use mutation_framework::Clock;
        self.clock.now()
    }
}

#[tokio::test]
async fn test_configured_timeout_travels_with_the_order() {
    let config = FrameworkConfig {
        lock_timeout_minutes: 30,
        ..FrameworkConfig::default()
    };
    let f = fixture_with(config).await;
    let order_id = f.place(f.alice, &[(f.widget, 1)]).await.unwrap();
    f.system.orders.open_for_edit(f.alice, order_id).await.unwrap();

    f.clock.advance(Duration::minutes(16));
    assert!(f.system.orders.open_for_edit(f.bob, order_id).await.is_err());

    f.clock.advance(Duration::minutes(15));
    f.system.orders.open_for_edit(f.bob, order_id).await.unwrap();
}

#[tokio::test]
async fn test_save_and_release_frees_the_order() {
    let f = fixture().await;
    let order_id = f.place(f.alice, &[(f.widget, 2)]).await.unwrap();

    let mut draft = f.system.orders.open_for_edit(f.alice, order_id).await.unwrap();
    draft.status = OrderStatus::Confirmed;
    f.system
        .orders
        .save_and_release(f.alice, &draft)
        .await
        .unwrap();

    let lock = f
        .system
        .orders
        .lock_status(f.bob, order_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!lock.is_set());

    let shipped = f
        .system
        .orders
        .update_status(f.bob, order_id, OrderStatus::Shipped)
        .await
        .unwrap();
    assert_eq!(shipped.status, OrderStatus::Shipped);
}

#[tokio::test]
async fn test_invalid_status_transition() {
    let f = fixture().await;
    let order_id = f.place(f.alice, &[(f.widget, 1)]).await.unwrap();
    let err = f
        .system
        .orders
        .update_status(f.alice, order_id, OrderStatus::Shipped)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrderError::InvalidTransition {
            from: OrderStatus::Placed,
            to: OrderStatus::Shipped
        }
    ));
}

#[tokio::test]
async fn test_force_unlock_lets_another_editor_in() {
    let f = fixture().await;
    let admin = UserId::new();
    let order_id = f.place(f.alice, &[(f.widget, 1)]).await.unwrap();
    f.system.orders.open_for_edit(f.alice, order_id).await.unwrap();

    assert!(f.system.orders.force_unlock(admin, order_id).await.unwrap());
    assert!(!f.system.orders.force_unlock(admin, order_id).await.unwrap());
    f.system.orders.open_for_edit(f.bob, order_id).await.unwrap();
}

// --- Cancellation ---

#[tokio::test]
async fn test_cancel_returns_stock_and_hides_order() {
    let f = fixture().await;
    let order_id = f.place(f.alice, &[(f.widget, 6), (f.gadget, 2)]).await.unwrap();
    assert_eq!(f.stock(f.widget).await, 14);

    f.system.orders.cancel(f.bob, order_id).await.unwrap();

    assert_eq!(f.stock(f.widget).await, 20);
    assert_eq!(f.stock(f.gadget).await, 3);
    assert!(f
        .system
        .orders
        .lines_of_order(f.alice, order_id)
        .await
        .unwrap()
        .is_empty());
    assert!(matches!(
        f.system.orders.get(f.alice, order_id).await,
        Err(OrderError::Mutation(MutationError::NotFound { .. }))
    ));

    // The tombstone is still there for readers that ask for it.
    let mut uow = f.system.factory().begin_work(f.alice);
    let orders = f
        .system
        .factory()
        .repository::<mutation_sample::model::Order>()
        .unwrap();
    let cancelled = orders
        .get_by_id_or_err(
            &mut uow,
            &order_id,
            mutation_framework::ReadOptions::detached().with_soft_deleted(),
        )
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    use mutation_framework::{Lockable, SoftDeletable};
    assert_eq!(cancelled.soft_delete().snapshot().deleted_by(), Some(f.bob));
    assert!(!cancelled.locking().snapshot().is_set());
}

#[tokio::test]
async fn test_cancel_blocked_by_foreign_lock_changes_nothing() {
    let f = fixture().await;
    let order_id = f.place(f.alice, &[(f.widget, 3)]).await.unwrap();
    f.system.orders.open_for_edit(f.alice, order_id).await.unwrap();

    let err = f.system.orders.cancel(f.bob, order_id).await.unwrap_err();
    assert!(is_lock_conflict(&err));

    assert_eq!(f.stock(f.widget).await, 17);
    assert_eq!(
        f.system
            .orders
            .lines_of_order(f.alice, order_id)
            .await
            .unwrap()
            .len(),
        1
    );
    let order = f.system.orders.get(f.alice, order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Placed);
}

// --- Customers and products ---

#[tokio::test]
async fn test_stale_customer_copy_is_rejected() {
    let f = fixture().await;
    let mut first = f.system.customers.get(f.alice, f.customer).await.unwrap();
    let mut second = f.system.customers.get(f.bob, f.customer).await.unwrap();

    first.name = "Ada King".to_string();
    f.system.customers.save(f.alice, &first).await.unwrap();

    second.email = "countess@example.com".to_string();
    let err = f.system.customers.save(f.bob, &second).await.unwrap_err();
    assert!(matches!(
        err,
        CustomerError::Mutation(MutationError::ConcurrencyConflict { entity_type: "Customer", .. })
    ));

    let stored = f.system.customers.get(f.alice, f.customer).await.unwrap();
    assert_eq!(stored.name, "Ada King");
    assert_eq!(stored.email, "ada@example.com");
}

#[tokio::test]
async fn test_customer_registration_rules_and_rename() {
    let f = fixture().await;
    let err = f
        .system
        .customers
        .register(
            f.alice,
            CustomerCreate {
                name: "Bad".to_string(),
                email: "not-an-email".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CustomerError::InvalidEmail(_)));

    let renamed = f
        .system
        .customers
        .rename(f.bob, f.customer, "Ada Lovelace".to_string())
        .await
        .unwrap();
    assert_eq!(renamed.name, "Ada Lovelace");
    assert_eq!(
        f.system.customers.list_active(f.alice).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_product_edits_respect_locks() {
    let f = fixture().await;
    f.system.products.open_for_edit(f.alice, f.widget).await.unwrap();

    let err = f
        .system
        .products
        .reprice(f.bob, f.widget, 30.0)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProductError::Mutation(MutationError::LockConflict { .. })
    ));
    let err = f.place(f.bob, &[(f.widget, 1)]).await.unwrap_err();
    assert!(is_lock_conflict(&err));

    let repriced = f.system.products.reprice(f.alice, f.widget, 30.0).await.unwrap();
    assert!((repriced.price - 30.0).abs() < f64::EPSILON);
    let adjusted = f
        .system
        .products
        .adjust_stock(f.bob, f.widget, -5)
        .await
        .unwrap();
    assert_eq!(adjusted.stock, 15);
    assert!(matches!(
        f.system.products.adjust_stock(f.bob, f.widget, -100).await,
        Err(ProductError::InsufficientStock {
            requested: 100,
            available: 15
        })
    ));
}

// --- Concurrency ---

#[tokio::test]
async fn test_concurrent_orders_never_lose_stock_updates() {
    let f = Arc::new(fixture().await);

    let mut handles = vec![];
    for _ in 0..10 {
        let f = Arc::clone(&f);
        handles.push(tokio::spawn(async move {
            f.place(UserId::new(), &[(f.widget, 2)]).await
        }));
    }

    let mut placed = 0u32;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => placed += 1,
            Err(err) => assert!(err.is_conflict(), "unexpected failure: {err}"),
        }
    }

    assert!(placed >= 1);
    assert_eq!(f.stock(f.widget).await, 20 - 2 * placed);
}
