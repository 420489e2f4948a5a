//! Core traits for the DDNS system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`IpResolver`]: Discover the current public IP
//! - [`DnsProvider`]: Read and write records via provider APIs
//! - [`ConfigStore`]: Durable desired state and status

pub mod config_store;
pub mod dns_provider;
pub mod ip_resolver;

pub use config_store::ConfigStore;
pub use dns_provider::{DnsProvider, DnsProviderFactory};
pub use ip_resolver::{IpResolver, IpResolverFactory};
