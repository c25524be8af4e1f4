//! # Commerce Demo
//!
//! Walks through the guarded mutation flow end to end:
//! 1. Setting up the [`CommerceSystem`].
//! 2. Registering a customer and stocking products.
//! 3. Placing an order in one transaction.
//! 4. Two operators racing for the same order: the second hits the lock.
//! 5. Cancelling the order, which returns the stock.
//!
//! Run with `RUST_LOG=info` (or `debug` for every store request).

use mutation_framework::tracing::setup_tracing;
use mutation_framework::{FrameworkConfig, SystemClock, UserId};
use mutation_sample::lifecycle::CommerceSystem;
use mutation_sample::model::{CustomerCreate, OrderCreate, OrderLine, OrderStatus, ProductCreate};
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};

#[tokio::main]
async fn main() -> Result<(), String> {
    setup_tracing();

    let config = FrameworkConfig::from_env().map_err(|e| e.to_string())?;
    info!(?config, "Starting commerce demo");
    let system =
        CommerceSystem::with_config(config, Arc::new(SystemClock)).map_err(|e| e.to_string())?;

    let alice = UserId::new();
    let bob = UserId::new();

    let span = tracing::info_span!("catalog_setup");
    let (customer_id, widget_id, gadget_id) = async {
        info!("Registering customer and products");
        let customer = system
            .customers
            .register(
                alice,
                CustomerCreate {
                    name: "Ada Lovelace".to_string(),
                    email: "ada@example.com".to_string(),
                },
            )
            .await
            .map_err(|e| e.to_string())?;
        let widget = system
            .products
            .create(
                alice,
                ProductCreate {
                    name: "Widget".to_string(),
                    price: 25.0,
                    stock: 10,
                },
            )
            .await
            .map_err(|e| e.to_string())?;
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
            .map_err(|e| e.to_string())?;
        Ok::<_, String>((customer, widget, gadget))
    }
    .instrument(span)
    .await?;

    let span = tracing::info_span!("order_placement");
    let order_id = async {
        system
            .orders
            .place_order(
                alice,
                OrderCreate {
                    customer_id,
                    lines: vec![
                        OrderLine {
                            product_id: widget_id,
                            quantity: 4,
                        },
                        OrderLine {
                            product_id: gadget_id,
                            quantity: 1,
                        },
                    ],
                },
            )
            .await
            .map_err(|e| e.to_string())
    }
    .instrument(span)
    .await?;

    let span = tracing::info_span!("concurrent_edit");
    async {
        let mut draft = system
            .orders
            .open_for_edit(alice, order_id)
            .await
            .map_err(|e| e.to_string())?;
        info!(%order_id, "Alice holds the order");

        match system.orders.open_for_edit(bob, order_id).await {
            Ok(_) => error!("Bob acquired a lock Alice still holds"),
            Err(e) if e.is_conflict() => warn!(error = %e, "Bob was turned away"),
            Err(e) => return Err(e.to_string()),
        }

        draft.status = OrderStatus::Confirmed;
        system
            .orders
            .save_and_release(alice, &draft)
            .await
            .map_err(|e| e.to_string())?;
        info!("Alice confirmed the order and released the lock");
        Ok::<_, String>(())
    }
    .instrument(span)
    .await?;

    let span = tracing::info_span!("cancellation");
    let cancel_result = async {
        system
            .orders
            .cancel(bob, order_id)
            .await
            .map_err(|e| e.to_string())?;
        system.products.get(bob, widget_id).await.map_err(|e| e.to_string())
    }
    .instrument(span)
    .await;

    match cancel_result {
        Ok(widget) => info!(stock = widget.stock, "Order cancelled; stock returned"),
        Err(e) => error!(error = %e, "Cancellation failed"),
    }

    system.shutdown().await?;

    info!("Demo completed successfully");
    Ok(())
}
