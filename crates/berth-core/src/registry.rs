//! Provider registry: logical service names to service definitions.
//!
//! A [`ProviderRegistry`] is assembled once through
//! [`ProviderRegistryBuilder`] and is read-only afterwards, so it can be
//! shared across threads behind an `Arc` without locking.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::definition::ServiceDefinition;

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No provider supports the name.
    #[error("unsupported service: {name}")]
    Unsupported {
        /// Requested name.
        name: String,
    },

    /// A provider for the name is already registered.
    #[error("duplicate provider: {name}")]
    Duplicate {
        /// Conflicting name.
        name: String,
    },

    /// The service reference is not `name` or `name:tag`.
    #[error("invalid service reference: {reference}")]
    InvalidReference {
        /// Offending reference.
        reference: String,
    },
}

/// Result type for registry operations.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Produces service definitions for one logical service.
pub trait ProviderFactory: Send + Sync {
    /// Canonical service name.
    fn name(&self) -> &str;

    /// Whether this provider answers to `name`. ASCII case-insensitive by default.
    fn supports(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(self.name())
    }

    /// Default image repository.
    fn default_image(&self) -> &str;

    /// Tag used when none is requested.
    fn default_tag(&self) -> &str;

    /// Build a definition for `tag`, or the default tag.
    fn create(&self, tag: Option<&str>) -> ServiceDefinition;
}

/// Collects providers before freezing them into a [`ProviderRegistry`].
#[derive(Default)]
pub struct ProviderRegistryBuilder {
    providers: Vec<Arc<dyn ProviderFactory>>,
}

impl ProviderRegistryBuilder {
    /// Add a provider.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if an existing provider already
    /// answers to the new provider's name, or the other way round.
    pub fn register(mut self, factory: impl ProviderFactory + 'static) -> RegistryResult<Self> {
        self.register_shared(Arc::new(factory))?;
        Ok(self)
    }

    /// Add an already shared provider.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] on a name clash.
    pub fn register_shared(&mut self, factory: Arc<dyn ProviderFactory>) -> RegistryResult<()> {
        let clash = self
            .providers
            .iter()
            .any(|p| p.supports(factory.name()) || factory.supports(p.name()));
        if clash {
            return Err(RegistryError::Duplicate {
                name: factory.name().to_string(),
            });
        }
        debug!(provider = factory.name(), "registered provider");
        self.providers.push(factory);
        Ok(())
    }

    /// Freeze the registry.
    #[must_use]
    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry {
            providers: self.providers.into(),
        }
    }
}

/// Frozen set of providers.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: Arc<[Arc<dyn ProviderFactory>]>,
}

impl ProviderRegistry {
    /// Start building a registry.
    #[must_use]
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    /// Find the provider answering to `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unsupported`] for unknown names.
    pub fn resolve(&self, name: &str) -> RegistryResult<Arc<dyn ProviderFactory>> {
        self.providers
            .iter()
            .find(|p| p.supports(name))
            .cloned()
            .ok_or_else(|| RegistryError::Unsupported {
                name: name.to_string(),
            })
    }

    /// Build a definition from a `name` or `name:tag` reference.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidReference`] for an empty name or tag,
    /// and [`RegistryError::Unsupported`] for unknown names.
    pub fn instantiate(&self, reference: &str) -> RegistryResult<ServiceDefinition> {
        let invalid = || RegistryError::InvalidReference {
            reference: reference.to_string(),
        };
        let (name, tag) = match reference.trim().split_once(':') {
            Some((name, tag)) => (name, Some(tag)),
            None => (reference.trim(), None),
        };
        if name.is_empty() || tag.is_some_and(|t| t.is_empty() || t.contains(':')) {
            return Err(invalid());
        }

        let provider = self.resolve(name)?;
        debug!(provider = provider.name(), tag = ?tag, "instantiating service");
        Ok(provider.create(tag))
    }

    /// Canonical names of all providers, in registration order.
    #[must_use]
    pub fn supported(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// All providers, in registration order.
    pub fn providers(&self) -> impl Iterator<Item = &Arc<dyn ProviderFactory>> {
        self.providers.iter()
    }

    /// Number of providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Check if no providers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.supported())
            .finish()
    }
}
