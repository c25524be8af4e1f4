//! # Order Service
//!
//! Orders span four entity types, so the multi-row operations run inside
//! an explicit transaction:
//!
//! - **place_order**: checks the customer, reserves stock on every product,
//!   writes the order and its lines. Product locks are claimed for the write
//!   and released once the transaction commits.
//! - **cancel**: locks the order, tombstones it, puts stock back and removes
//!   the lines.
//!
//! Any failure inside the transaction rolls everything back, including
//! scheduled lock releases.
//!
//! Editing is a two-step flow across requests: [`OrderService::open_for_edit`]
//! persists the editor's lock; [`OrderService::save_and_release`] writes the
//! edited copy and drops the lock after the save.

use crate::error::OrderError;
use crate::model::{
    Customer, Order, OrderCreate, OrderId, OrderProduct, OrderStatus, Product,
};
use mutation_framework::{
    DomainRepository, LockInfo, MutationError, ReadOptions, Repository, UnitOfWork,
    UnitOfWorkFactory, UserId,
};
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct OrderService {
    factory: UnitOfWorkFactory,
    orders: Repository<Order>,
    lines: Repository<OrderProduct>,
    products: Repository<Product>,
    customers: Repository<Customer>,
}

impl DomainRepository<Order> for OrderService {
    type Error = OrderError;

    fn repository(&self) -> &Repository<Order> {
        &self.orders
    }
}

impl OrderService {
    pub fn new(factory: UnitOfWorkFactory) -> Result<Self, MutationError> {
        Ok(Self {
            orders: factory.repository()?,
            lines: factory.repository()?,
            products: factory.repository()?,
            customers: factory.repository()?,
            factory,
        })
    }

    #[instrument(skip(self, params), fields(user = %user, lines = params.lines.len()))]
    pub async fn place_order(
        &self,
        user: UserId,
        params: OrderCreate,
    ) -> Result<OrderId, OrderError> {
        if params.lines.is_empty() {
            return Err(OrderError::EmptyOrder);
        }

        let mut uow = self.factory.begin_work(user);
        uow.begin_transaction().await?;
        match self.stage_order(&mut uow, params).await {
            Ok(order_id) => {
                uow.commit_transaction().await?;
                info!(%order_id, "Order placed");
                Ok(order_id)
            }
            Err(err) => {
                abort(&mut uow).await;
                Err(err)
            }
        }
    }

    async fn stage_order(
        &self,
        uow: &mut UnitOfWork,
        params: OrderCreate,
    ) -> Result<OrderId, OrderError> {
        if !self.customers.exists(uow, &params.customer_id).await? {
            return Err(OrderError::UnknownCustomer(params.customer_id));
        }

        let mut order = Order::new(
            params.customer_id,
            self.factory.config().lock_timeout_minutes,
        )
        .map_err(MutationError::from)?;
        let mut lines = Vec::with_capacity(params.lines.len());

        for line in params.lines {
            if line.quantity == 0 {
                return Err(OrderError::InvalidQuantity(line.product_id));
            }
            let mut product = self
                .products
                .get_by_id_or_err(uow, &line.product_id, ReadOptions::tracked())
                .await?;
            if product.stock < line.quantity {
                return Err(OrderError::InsufficientStock {
                    product_id: product.id,
                    requested: line.quantity,
                    available: product.stock,
                });
            }
            product.stock -= line.quantity;
            self.products.save_and_release(uow, &product)?;

            let entry = OrderProduct::new(order.id, product.id, line.quantity, product.price);
            order.total += entry.line_total();
            lines.push(entry);
        }

        self.orders.add(uow, &order);
        for line in &lines {
            self.lines.add(uow, line);
        }
        uow.save_changes().await?;
        Ok(order.id)
    }

    #[instrument(skip(self), fields(user = %user))]
    pub async fn get(&self, user: UserId, id: OrderId) -> Result<Order, OrderError> {
        let mut uow = self.factory.begin_work(user);
        self.find(&mut uow, id).await
    }

    /// Locks the order for `user` and persists the lock. Fails with a lock
    /// conflict while someone else holds it.
    #[instrument(skip(self), fields(user = %user))]
    pub async fn open_for_edit(&self, user: UserId, id: OrderId) -> Result<Order, OrderError> {
        let mut uow = self.factory.begin_work(user);
        self.find_for_edit(&mut uow, id).await?;
        uow.save_changes().await?;
        info!(order_id = %id, "Order opened for edit");
        self.find(&mut uow, id).await
    }

    #[instrument(skip(self), fields(user = %user))]
    pub async fn update_status(
        &self,
        user: UserId,
        id: OrderId,
        status: OrderStatus,
    ) -> Result<Order, OrderError> {
        let mut uow = self.factory.begin_work(user);
        let mut order = self.find(&mut uow, id).await?;
        if order.status == status {
            return Ok(order);
        }
        if !order.status.can_become(status) {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                to: status,
            });
        }
        order.status = status;
        self.orders.update(&mut uow, &order)?;
        uow.save_changes().await?;
        self.find(&mut uow, id).await
    }

    /// Writes an edited copy and releases the editor's lock once the write is
    /// durable.
    #[instrument(skip(self, order), fields(user = %user, order_id = %order.id))]
    pub async fn save_and_release(&self, user: UserId, order: &Order) -> Result<(), OrderError> {
        let mut uow = self.factory.begin_work(user);
        self.orders.save_and_release(&mut uow, order)?;
        uow.save_changes().await?;
        Ok(())
    }

    /// Cancels the order: tombstone, stock returned, lines removed.
    #[instrument(skip(self), fields(user = %user))]
    pub async fn cancel(&self, user: UserId, id: OrderId) -> Result<(), OrderError> {
        let mut uow = self.factory.begin_work(user);
        uow.begin_transaction().await?;
        match self.stage_cancel(&mut uow, id).await {
            Ok(()) => {
                uow.commit_transaction().await?;
                info!(order_id = %id, "Order cancelled");
                Ok(())
            }
            Err(err) => {
                abort(&mut uow).await;
                Err(err)
            }
        }
    }

    async fn stage_cancel(&self, uow: &mut UnitOfWork, id: OrderId) -> Result<(), OrderError> {
        let mut order = self.find_for_edit(uow, id).await?;
        if order.status == OrderStatus::Shipped {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Cancelled,
            });
        }
        order.status = OrderStatus::Cancelled;
        self.orders.soft_delete(uow, &order)?;
        uow.release_lock_after_save(&order);

        let lines = self
            .lines
            .find(uow, ReadOptions::tracked(), |line| line.order_id == id)
            .await?;
        for line in &lines {
            let mut product = self
                .products
                .get_by_id_or_err(uow, &line.product_id, ReadOptions::tracked())
                .await?;
            product.stock = product.stock.saturating_add(line.quantity);
            self.products.save_and_release(uow, &product)?;
            self.lines.remove(uow, line)?;
        }

        uow.save_changes().await?;
        Ok(())
    }

    /// Administrative release of a stuck lock. Returns whether one was held.
    #[instrument(skip(self), fields(user = %user))]
    pub async fn force_unlock(&self, user: UserId, id: OrderId) -> Result<bool, OrderError> {
        let mut uow = self.factory.begin_work(user);
        let order = self.find(&mut uow, id).await?;
        let cleared = self.orders.force_unlock(&mut uow, &order);
        if cleared {
            uow.save_changes().await?;
        }
        Ok(cleared)
    }

    pub async fn lock_status(
        &self,
        user: UserId,
        id: OrderId,
    ) -> Result<Option<LockInfo>, OrderError> {
        let mut uow = self.factory.begin_work(user);
        let order = self.find(&mut uow, id).await?;
        Ok(self.orders.lock_status(&order))
    }

    pub async fn lines_of_order(
        &self,
        user: UserId,
        id: OrderId,
    ) -> Result<Vec<OrderProduct>, OrderError> {
        let mut uow = self.factory.begin_work(user);
        Ok(self
            .lines
            .find(&mut uow, ReadOptions::detached(), |line| line.order_id == id)
            .await?)
    }
}

async fn abort(uow: &mut UnitOfWork) {
    if let Err(err) = uow.rollback_transaction().await {
        warn!(error = %err, "Rollback failed");
    }
}
