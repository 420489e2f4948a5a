// # IP Resolver Trait
//
// Determines the machine's current public address for one address family.
//
// ## Implementations
//
// - HTTP discovery services: `ddns-ip-http` crate
//
// ## Usage
//
// ```rust,ignore
// use ddns_core::{AddressFamily, IpResolver};
//
// let ip = resolver.resolve(AddressFamily::Ipv4).await?;
// ```

use async_trait::async_trait;
use std::net::IpAddr;

use crate::model::AddressFamily;

/// Trait for public IP discovery
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Query external discovery services over HTTP(S)
/// - ✅ Try several endpoints in order within one call
///
/// ## Forbidden Capabilities
/// - ❌ Cache results between calls (the reconciler decides when to resolve)
/// - ❌ Retry with sleeps or backoff (failures are retried on the next tick)
/// - ❌ Spawn tasks
/// - ❌ Touch the config store or the DNS provider
///
/// Every call must be bounded by a finite timeout.
#[async_trait]
pub trait IpResolver: Send + Sync {
    /// Resolve the current public address of `family`
    ///
    /// # Returns
    ///
    /// - `Ok(IpAddr)`: an address of the requested family
    /// - `Err(Error::Resolution)`: service unreachable, timed out, or
    ///   answered with an address of the other family
    async fn resolve(&self, family: AddressFamily) -> Result<IpAddr, crate::Error>;

    /// Resolver name (for logging/debugging)
    fn resolver_name(&self) -> &'static str;
}

/// Helper trait for constructing IP resolvers from configuration
pub trait IpResolverFactory: Send + Sync {
    fn create(
        &self,
        config: &crate::config::ResolverConfig,
    ) -> Result<Box<dyn IpResolver>, crate::Error>;
}
