//! Plugin-based provider registry
//!
//! The registry allows DNS providers and IP resolvers to be registered
//! dynamically at runtime, avoiding hardcoded if-else chains.
//!
//! ## Registration
//!
//! Implementation crates expose a `register` function:
//!
//! ```rust,ignore
//! // In ddns-provider-cloudflare
//! pub fn register(registry: &ProviderRegistry) {
//!     registry.register_provider("cloudflare", Box::new(CloudflareFactory));
//! }
//! ```
//!
//! and the daemon builds components from configuration:
//!
//! ```rust,ignore
//! let provider = registry.create_provider(&settings.provider)?;
//! let resolver = registry.create_resolver(&settings.resolver)?;
//! ```

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::{ProviderConfig, ResolverConfig};
use crate::error::{Error, Result};
use crate::traits::{DnsProvider, DnsProviderFactory, IpResolver, IpResolverFactory};

/// Registry of provider and resolver factories
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Box<dyn DnsProviderFactory>>>,
    resolvers: RwLock<HashMap<String, Box<dyn IpResolverFactory>>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a DNS provider factory
    ///
    /// # Parameters
    ///
    /// - `name`: Provider type name (e.g., "cloudflare")
    /// - `factory`: Factory object for creating provider instances
    pub fn register_provider(&self, name: impl Into<String>, factory: Box<dyn DnsProviderFactory>) {
        write(&self.providers).insert(name.into(), factory);
    }

    /// Register an IP resolver factory
    ///
    /// # Parameters
    ///
    /// - `name`: Resolver type name (e.g., "http")
    /// - `factory`: Factory object for creating resolver instances
    pub fn register_resolver(&self, name: impl Into<String>, factory: Box<dyn IpResolverFactory>) {
        write(&self.resolvers).insert(name.into(), factory);
    }

    /// Create a DNS provider from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn DnsProvider>)`: Created provider instance
    /// - `Err(Error)`: If provider type is not registered or creation fails
    pub fn create_provider(&self, config: &ProviderConfig) -> Result<Box<dyn DnsProvider>> {
        let provider_type = config.type_name();
        let providers = read(&self.providers);

        let factory = providers
            .get(provider_type)
            .ok_or_else(|| Error::config(format!("Unknown provider type: {}", provider_type)))?;

        factory.create(config)
    }

    /// Create an IP resolver from configuration
    pub fn create_resolver(&self, config: &ResolverConfig) -> Result<Box<dyn IpResolver>> {
        let resolver_type = config.type_name();
        let resolvers = read(&self.resolvers);

        let factory = resolvers
            .get(resolver_type)
            .ok_or_else(|| Error::config(format!("Unknown resolver type: {}", resolver_type)))?;

        factory.create(config)
    }

    /// List all registered provider types
    pub fn list_providers(&self) -> Vec<String> {
        read(&self.providers).keys().cloned().collect()
    }

    /// List all registered resolver types
    pub fn list_resolvers(&self) -> Vec<String> {
        read(&self.resolvers).keys().cloned().collect()
    }

    /// Check if a provider type is registered
    pub fn has_provider(&self, name: &str) -> bool {
        read(&self.providers).contains_key(name)
    }

    /// Check if a resolver type is registered
    pub fn has_resolver(&self, name: &str) -> bool {
        read(&self.resolvers).contains_key(name)
    }
}

// Factories are only inserted whole, so a poisoned map is still consistent
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
