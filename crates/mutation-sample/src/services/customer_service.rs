//! # Customer Service
//!
//! Registration and profile maintenance. Customers are not lockable, so
//! concurrent edits are settled by the row version alone: the second writer
//! of a stale copy gets a concurrency conflict.

use crate::error::CustomerError;
use crate::model::{Customer, CustomerCreate, CustomerId};
use mutation_framework::{
    DomainRepository, MutationError, ReadOptions, Repository, UnitOfWorkFactory, UserId,
};
use tracing::{info, instrument};

#[derive(Debug, Clone)]
pub struct CustomerService {
    factory: UnitOfWorkFactory,
    customers: Repository<Customer>,
}

impl DomainRepository<Customer> for CustomerService {
    type Error = CustomerError;

    fn repository(&self) -> &Repository<Customer> {
        &self.customers
    }
}

impl CustomerService {
    pub fn new(factory: UnitOfWorkFactory) -> Result<Self, MutationError> {
        let customers = factory.repository()?;
        Ok(Self { factory, customers })
    }

    #[instrument(skip(self, params), fields(user = %user))]
    pub async fn register(
        &self,
        user: UserId,
        params: CustomerCreate,
    ) -> Result<CustomerId, CustomerError> {
        validate_name(&params.name)?;
        validate_email(&params.email)?;

        let mut uow = self.factory.begin_work(user);
        let customer = Customer::new(params.name, params.email);
        self.customers.add(&mut uow, &customer);
        uow.save_changes().await?;

        info!(customer_id = %customer.id, "Customer registered");
        Ok(customer.id)
    }

    #[instrument(skip(self), fields(user = %user))]
    pub async fn get(&self, user: UserId, id: CustomerId) -> Result<Customer, CustomerError> {
        let mut uow = self.factory.begin_work(user);
        self.find(&mut uow, id).await
    }

    /// Active customers.
    pub async fn list_active(&self, user: UserId) -> Result<Vec<Customer>, CustomerError> {
        let mut uow = self.factory.begin_work(user);
        self.list(&mut uow).await
    }

    #[instrument(skip(self, name), fields(user = %user))]
    pub async fn rename(
        &self,
        user: UserId,
        id: CustomerId,
        name: String,
    ) -> Result<Customer, CustomerError> {
        validate_name(&name)?;
        let mut uow = self.factory.begin_work(user);
        let mut customer = self.find(&mut uow, id).await?;
        customer.name = name;
        self.customers.update(&mut uow, &customer)?;
        uow.save_changes().await?;
        self.find(&mut uow, id).await
    }

    /// Writes back a copy the caller edited. The copy's row version decides
    /// whether the write is stale.
    #[instrument(skip(self, customer), fields(user = %user, customer_id = %customer.id))]
    pub async fn save(&self, user: UserId, customer: &Customer) -> Result<(), CustomerError> {
        validate_name(&customer.name)?;
        validate_email(&customer.email)?;
        let mut uow = self.factory.begin_work(user);
        self.customers.update(&mut uow, customer)?;
        uow.save_changes().await?;
        Ok(())
    }

    /// Soft-deletes the customer. Returns `false` if already deactivated.
    #[instrument(skip(self), fields(user = %user))]
    pub async fn deactivate(&self, user: UserId, id: CustomerId) -> Result<bool, CustomerError> {
        let mut uow = self.factory.begin_work(user);
        let customer = self.find(&mut uow, id).await?;
        let changed = self.customers.soft_delete(&mut uow, &customer)?;
        uow.save_changes().await?;
        info!(customer_id = %id, "Customer deactivated");
        Ok(changed)
    }

    #[instrument(skip(self), fields(user = %user))]
    pub async fn restore(&self, user: UserId, id: CustomerId) -> Result<bool, CustomerError> {
        let mut uow = self.factory.begin_work(user);
        let customer = self
            .customers
            .get_by_id_or_err(&mut uow, &id, ReadOptions::tracked().with_soft_deleted())
            .await?;
        let restored = self.customers.restore(&mut uow, &customer)?;
        uow.save_changes().await?;
        if restored {
            info!(customer_id = %id, "Customer restored");
        }
        Ok(restored)
    }
}

fn validate_name(name: &str) -> Result<(), CustomerError> {
    if name.trim().is_empty() {
        return Err(CustomerError::EmptyName);
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), CustomerError> {
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if valid {
        Ok(())
    } else {
        Err(CustomerError::InvalidEmail(email.to_string()))
    }
}
