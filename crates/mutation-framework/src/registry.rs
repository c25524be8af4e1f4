//! # Capability Registry
//!
//! Built once at startup from the entity types an application persists. The
//! store derives its table schemas from it, and repositories refuse to serve
//! types that were never registered.

use crate::entity::{CapabilitySet, Entity};
use crate::error::MutationError;
use std::collections::HashMap;

/// Registered metadata for one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub entity_type: &'static str,
    pub capabilities: CapabilitySet,
}

/// Maps entity type names to their declared capabilities.
///
/// ```rust
/// use mutation_framework::CapabilityRegistry;
///
/// let registry = CapabilityRegistry::new();
/// assert!(registry.descriptor("Order").is_none());
/// assert!(registry.is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    descriptors: HashMap<&'static str, EntityDescriptor>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `T` and the capabilities it declares. Registering twice is harmless.
    pub fn register<T: Entity>(&mut self) -> &mut Self {
        let descriptor = EntityDescriptor {
            entity_type: T::ENTITY_TYPE,
            capabilities: T::capabilities().set(),
        };
        self.descriptors.insert(T::ENTITY_TYPE, descriptor);
        self
    }

    pub fn descriptor(&self, entity_type: &str) -> Option<&EntityDescriptor> {
        self.descriptors.get(entity_type)
    }

    pub fn require<T: Entity>(&self) -> Result<&EntityDescriptor, MutationError> {
        self.descriptor(T::ENTITY_TYPE)
            .ok_or(MutationError::Unregistered {
                entity_type: T::ENTITY_TYPE,
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.descriptors.values()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::{ConcurrencyToken, Versioned};
    use crate::entity::Capabilities;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Invoice {
        id: u64,
        row_version: ConcurrencyToken,
    }

    impl Versioned for Invoice {
        fn row_version(&self) -> ConcurrencyToken {
            self.row_version
        }

        fn set_row_version(&mut self, version: ConcurrencyToken) {
            self.row_version = version;
        }
    }

    impl Entity for Invoice {
        type Id = u64;
        const ENTITY_TYPE: &'static str = "Invoice";

        fn id(&self) -> &u64 {
            &self.id
        }

        fn capabilities() -> Capabilities<Self> {
            Capabilities::none().versioned()
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Memo {
        id: u64,
    }

    impl Entity for Memo {
        type Id = u64;
        const ENTITY_TYPE: &'static str = "Memo";

        fn id(&self) -> &u64 {
            &self.id
        }
    }

    #[test]
    fn test_register_records_declared_capabilities() {
        let mut registry = CapabilityRegistry::new();
        registry.register::<Invoice>().register::<Invoice>();
        assert_eq!(registry.len(), 1);

        let descriptor = registry.require::<Invoice>().unwrap();
        assert_eq!(descriptor.entity_type, "Invoice");
        assert!(descriptor.capabilities.concurrency);
        assert!(!descriptor.capabilities.locking);
        assert!(!descriptor.capabilities.soft_delete);
    }

    #[test]
    fn test_unregistered_type_is_an_error() {
        let mut registry = CapabilityRegistry::new();
        registry.register::<Invoice>();
        assert!(matches!(
            registry.require::<Memo>(),
            Err(MutationError::Unregistered { entity_type: "Memo" })
        ));
    }
}
