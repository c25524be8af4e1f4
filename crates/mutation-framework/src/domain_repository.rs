//! # DomainRepository Trait
//!
//! Common read paths for domain services, provided on top of a generic
//! [`Repository`] so each service only supplies the repository and its error
//! mapping.

use crate::error::MutationError;
use crate::repository::{ReadOptions, Repository};
use crate::unit_of_work::UnitOfWork;
use crate::Entity;
use async_trait::async_trait;

/// Trait for domain services to inherit standard reads.
///
/// # Example
///
/// ```rust
/// use mutation_framework::{DomainRepository, Entity, MutationError, Repository};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Debug, Serialize, Deserialize)]
/// struct Tag { id: u32, label: String }
///
/// impl Entity for Tag {
///     type Id = u32;
///     const ENTITY_TYPE: &'static str = "Tag";
///     fn id(&self) -> &u32 { &self.id }
/// }
///
/// #[derive(Debug, thiserror::Error)]
/// enum TagError {
///     #[error(transparent)]
///     Mutation(#[from] MutationError),
/// }
///
/// struct TagService { tags: Repository<Tag> }
///
/// impl DomainRepository<Tag> for TagService {
///     type Error = TagError;
///     fn repository(&self) -> &Repository<Tag> { &self.tags }
/// }
/// ```
#[async_trait]
pub trait DomainRepository<T: Entity>: Send + Sync {
    /// The domain-specific error type.
    type Error: From<MutationError> + Send;

    fn repository(&self) -> &Repository<T>;

    /// Map framework errors to the domain error type.
    fn map_error(e: MutationError) -> Self::Error {
        Self::Error::from(e)
    }

    /// Fetch a visible entity by id, tracked.
    #[tracing::instrument(skip(self, uow), fields(entity_type = T::ENTITY_TYPE))]
    async fn find(&self, uow: &mut UnitOfWork, id: T::Id) -> Result<T, Self::Error> {
        tracing::debug!("Loading");
        self.repository()
            .get_by_id_or_err(uow, &id, ReadOptions::tracked())
            .await
            .map_err(Self::map_error)
    }

    /// Fetch by id and lock it for the acting user.
    #[tracing::instrument(skip(self, uow), fields(entity_type = T::ENTITY_TYPE))]
    async fn find_for_edit(&self, uow: &mut UnitOfWork, id: T::Id) -> Result<T, Self::Error> {
        tracing::debug!("Loading for edit");
        self.repository()
            .get_by_id_or_err(uow, &id, ReadOptions::for_edit())
            .await
            .map_err(Self::map_error)
    }

    /// Every visible entity of this type.
    async fn list(&self, uow: &mut UnitOfWork) -> Result<Vec<T>, Self::Error> {
        self.repository()
            .get_all(uow, ReadOptions::detached())
            .await
            .map_err(Self::map_error)
    }
}
