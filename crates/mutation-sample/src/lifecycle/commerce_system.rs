use crate::model::{Customer, Order, OrderProduct, Product};
use crate::services::{CustomerService, OrderService, ProductService};
use mutation_framework::store::StoreActor;
use mutation_framework::{
    CapabilityRegistry, Clock, FrameworkConfig, MutationError, SystemClock, UnitOfWorkFactory,
};
use std::sync::Arc;
use tracing::{error, info};

/// Every entity type the commerce domain persists.
pub fn commerce_registry() -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry
        .register::<Customer>()
        .register::<Product>()
        .register::<Order>()
        .register::<OrderProduct>();
    registry
}

/// The runtime orchestrator for the commerce domain.
///
/// # Example
///
/// ```ignore
/// let system = CommerceSystem::new()?;
///
/// let customer = system.customers.register(user, customer_data).await?;
/// let product = system.products.create(user, product_data).await?;
/// let order = system.orders.place_order(user, order_data).await?;
///
/// system.shutdown().await?;
/// ```
pub struct CommerceSystem {
    pub customers: CustomerService,
    pub products: ProductService,
    pub orders: OrderService,
    factory: UnitOfWorkFactory,
    store_handle: tokio::task::JoinHandle<()>,
}

impl CommerceSystem {
    /// Default configuration and the wall clock.
    pub fn new() -> Result<Self, MutationError> {
        Self::with_config(FrameworkConfig::default(), Arc::new(SystemClock))
    }

    /// Must be called inside a Tokio runtime; the store actor is spawned here.
    pub fn with_config(
        config: FrameworkConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, MutationError> {
        let registry = commerce_registry();
        let (store, client) = StoreActor::new(config.store_buffer_size, &registry);
        let store_handle = tokio::spawn(store.run());

        let factory = UnitOfWorkFactory::new(Arc::new(client), Arc::new(registry), clock, config);
        info!(
            lock_timeout_minutes = factory.config().lock_timeout_minutes,
            "Commerce system started"
        );

        Ok(Self {
            customers: CustomerService::new(factory.clone())?,
            products: ProductService::new(factory.clone())?,
            orders: OrderService::new(factory.clone())?,
            factory,
            store_handle,
        })
    }

    /// For callers that need their own units of work.
    pub fn factory(&self) -> &UnitOfWorkFactory {
        &self.factory
    }

    /// Drops every store handle and waits for the store task to finish.
    pub async fn shutdown(self) -> Result<(), String> {
        info!("Shutting down system...");

        drop(self.customers);
        drop(self.products);
        drop(self.orders);
        drop(self.factory);

        if let Err(e) = self.store_handle.await {
            error!("Store task failed: {:?}", e);
            return Err(format!("Store task failed: {:?}", e));
        }

        info!("System shutdown complete.");
        Ok(())
    }
}
