//! # Product Service
//!
//! Catalog and inventory. Every change claims the product's lock for the
//! duration of the save and releases it afterwards, so an operator holding
//! a product open for edit blocks repricing and stock changes by others.

use crate::error::ProductError;
use crate::model::{Product, ProductCreate, ProductId};
use mutation_framework::{
    DomainRepository, LockInfo, MutationError, Repository, UnitOfWorkFactory, UserId,
};
use tracing::{debug, info, instrument};

#[derive(Debug, Clone)]
pub struct ProductService {
    factory: UnitOfWorkFactory,
    products: Repository<Product>,
}

impl DomainRepository<Product> for ProductService {
    type Error = ProductError;

    fn repository(&self) -> &Repository<Product> {
        &self.products
    }
}

impl ProductService {
    pub fn new(factory: UnitOfWorkFactory) -> Result<Self, MutationError> {
        let products = factory.repository()?;
        Ok(Self { factory, products })
    }

    #[instrument(skip(self, params), fields(user = %user))]
    pub async fn create(
        &self,
        user: UserId,
        params: ProductCreate,
    ) -> Result<ProductId, ProductError> {
        validate_price(params.price)?;
        let mut uow = self.factory.begin_work(user);
        let product = Product::new(
            params.name,
            params.price,
            params.stock,
            self.factory.config().lock_timeout_minutes,
        )
        .map_err(MutationError::from)?;
        self.products.add(&mut uow, &product);
        uow.save_changes().await?;

        info!(product_id = %product.id, "Product created");
        Ok(product.id)
    }

    #[instrument(skip(self), fields(user = %user))]
    pub async fn get(&self, user: UserId, id: ProductId) -> Result<Product, ProductError> {
        let mut uow = self.factory.begin_work(user);
        self.find(&mut uow, id).await
    }

    #[instrument(skip(self), fields(user = %user))]
    pub async fn reprice(
        &self,
        user: UserId,
        id: ProductId,
        price: f64,
    ) -> Result<Product, ProductError> {
        validate_price(price)?;
        let mut uow = self.factory.begin_work(user);
        let mut product = self.find(&mut uow, id).await?;
        debug!(old = product.price, new = price, "Repricing");
        product.price = price;
        self.products.save_and_release(&mut uow, &product)?;
        uow.save_changes().await?;
        self.find(&mut uow, id).await
    }

    /// Adds `delta` units (negative to remove). Stock never goes below zero.
    #[instrument(skip(self), fields(user = %user))]
    pub async fn adjust_stock(
        &self,
        user: UserId,
        id: ProductId,
        delta: i64,
    ) -> Result<Product, ProductError> {
        let mut uow = self.factory.begin_work(user);
        let mut product = self.find(&mut uow, id).await?;
        product.stock = apply_delta(product.stock, delta)?;
        self.products.save_and_release(&mut uow, &product)?;
        uow.save_changes().await?;
        info!(product_id = %id, stock = product.stock, "Stock adjusted");
        self.find(&mut uow, id).await
    }

    /// Locks the product for `user` and persists the lock.
    #[instrument(skip(self), fields(user = %user))]
    pub async fn open_for_edit(&self, user: UserId, id: ProductId) -> Result<Product, ProductError> {
        let mut uow = self.factory.begin_work(user);
        self.find_for_edit(&mut uow, id).await?;
        uow.save_changes().await?;
        self.find(&mut uow, id).await
    }

    pub async fn lock_status(
        &self,
        user: UserId,
        id: ProductId,
    ) -> Result<Option<LockInfo>, ProductError> {
        let mut uow = self.factory.begin_work(user);
        let product = self.find(&mut uow, id).await?;
        Ok(self.products.lock_status(&product))
    }
}

fn validate_price(price: f64) -> Result<(), ProductError> {
    if price.is_finite() && price >= 0.0 {
        Ok(())
    } else {
        Err(ProductError::InvalidPrice(price))
    }
}

fn apply_delta(stock: u32, delta: i64) -> Result<u32, ProductError> {
    let next = i64::from(stock)
        .checked_add(delta)
        .ok_or(ProductError::StockOverflow)?;
    if next < 0 {
        return Err(ProductError::InsufficientStock {
            requested: u32::try_from(delta.unsigned_abs()).unwrap_or(u32::MAX),
            available: stock,
        });
    }
    u32::try_from(next).map_err(|_| ProductError::StockOverflow)
}
