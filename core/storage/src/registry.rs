//! Provider registry for resolving the remote store by name.

use std::collections::HashMap;
use std::sync::Arc;

use driveback_common::{Error, Result};

use crate::gdrive::{GDriveProvider, TokenManager};
use crate::memory::MemoryRemote;
use crate::provider::RemoteStore;

/// Factory that builds a remote store once credentials are available.
pub type RemoteFactory =
    Box<dyn Fn(Arc<TokenManager>) -> Result<Arc<dyn RemoteStore>> + Send + Sync>;

/// Registry for remote store factories.
///
/// The remote can only be built after authorization completes, so the
/// registry hands out factories keyed by provider name rather than
/// ready-made stores.
pub struct ProviderRegistry {
    factories: HashMap<String, RemoteFactory>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a provider factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: RemoteFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Provider '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Build the provider `name` with the given credentials.
    ///
    /// # Errors
    /// - Provider not found
    /// - Provider construction failed
    pub fn resolve(
        &self,
        name: &str,
        token_manager: Arc<TokenManager>,
    ) -> Result<Arc<dyn RemoteStore>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            Error::NotFound(format!("Provider '{}' is not registered", name))
        })?;
        factory(token_manager)
    }

    /// Get list of registered provider names.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a provider is registered.
    pub fn has_provider(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in providers.
///
/// - `gdrive`: Google Drive
/// - `memory`: discards uploads after the process exits; useful for a dry
///   run of the trigger and authorization flow
pub fn create_default_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();

    let gdrive: RemoteFactory = Box::new(|token_manager: Arc<TokenManager>| {
        let provider: Arc<dyn RemoteStore> = Arc::new(GDriveProvider::new(token_manager)?);
        Ok(provider)
    });
    registry.factories.insert("gdrive".to_string(), gdrive);

    let memory: Arc<dyn RemoteStore> = Arc::new(MemoryRemote::new());
    let memory_factory: RemoteFactory = Box::new(move |_: Arc<TokenManager>| Ok(memory.clone()));
    registry.factories.insert("memory".to_string(), memory_factory);

    registry
}
