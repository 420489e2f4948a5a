//! Configuration types for the DDNS system
//!
//! These describe how the engine's collaborators are built (resolver,
//! provider, store) and how the engine schedules work. The desired-state
//! configs themselves live in the config store, not here.

use serde::{Deserialize, Serialize};

/// Default discovery endpoints for IPv4, tried in order
pub const DEFAULT_IPV4_URLS: &[&str] = &["https://api4.ipify.org", "https://ipv4.icanhazip.com"];

/// Default discovery endpoints for IPv6, tried in order
pub const DEFAULT_IPV6_URLS: &[&str] = &["https://api6.ipify.org", "https://ipv6.icanhazip.com"];

/// Top-level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DdnsSettings {
    #[serde(default)]
    pub resolver: ResolverConfig,

    pub provider: ProviderConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

impl DdnsSettings {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.resolver.validate()?;
        self.provider.validate()?;
        self.store.validate()?;
        self.engine.validate()?;
        Ok(())
    }
}

/// IP resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolverConfig {
    /// Plain-text HTTP discovery services
    Http {
        /// IPv4 endpoints, tried in order
        ipv4_urls: Vec<String>,
        /// IPv6 endpoints, tried in order
        ipv6_urls: Vec<String>,
        /// Per-request timeout
        #[serde(default = "default_resolver_timeout_secs")]
        timeout_secs: u64,
    },

    /// Custom resolver
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl ResolverConfig {
    /// Validate the resolver configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            ResolverConfig::Http {
                ipv4_urls,
                ipv6_urls,
                timeout_secs,
            } => {
                if ipv4_urls.is_empty() && ipv6_urls.is_empty() {
                    return Err(crate::Error::config(
                        "HTTP resolver needs at least one discovery URL",
                    ));
                }
                for url in ipv4_urls.iter().chain(ipv6_urls) {
                    if !url.starts_with("https://") && !url.starts_with("http://") {
                        return Err(crate::Error::config(format!(
                            "Discovery URL must use HTTP or HTTPS scheme. Got: {}",
                            url
                        )));
                    }
                }
                if *timeout_secs == 0 || *timeout_secs > 60 {
                    return Err(crate::Error::config(format!(
                        "Resolver timeout must be between 1 and 60 seconds. Got: {}",
                        timeout_secs
                    )));
                }
                Ok(())
            }
            ResolverConfig::Custom { factory, .. } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom resolver factory cannot be empty",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Get the resolver type name
    pub fn type_name(&self) -> &str {
        match self {
            ResolverConfig::Http { .. } => "http",
            ResolverConfig::Custom { factory, .. } => factory,
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig::Http {
            ipv4_urls: DEFAULT_IPV4_URLS.iter().map(|s| s.to_string()).collect(),
            ipv6_urls: DEFAULT_IPV6_URLS.iter().map(|s| s.to_string()).collect(),
            timeout_secs: default_resolver_timeout_secs(),
        }
    }
}

fn default_resolver_timeout_secs() -> u64 {
    10
}

/// DNS provider configuration
///
/// The credential is supplied here once and never persisted with configs.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Cloudflare provider
    Cloudflare {
        /// Cloudflare API token
        api_token: String,
        /// API base URL override
        #[serde(default)]
        api_base: Option<String>,
        /// Per-request timeout
        #[serde(default = "default_provider_timeout_secs")]
        timeout_secs: u64,
        /// Read for real, log writes only
        #[serde(default)]
        dry_run: bool,
    },

    /// Custom provider
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderConfig::Cloudflare {
                api_base,
                timeout_secs,
                dry_run,
                ..
            } => f
                .debug_struct("Cloudflare")
                .field("api_token", &"<REDACTED>")
                .field("api_base", api_base)
                .field("timeout_secs", timeout_secs)
                .field("dry_run", dry_run)
                .finish(),
            ProviderConfig::Custom { factory, .. } => f
                .debug_struct("Custom")
                .field("factory", factory)
                .finish_non_exhaustive(),
        }
    }
}

impl ProviderConfig {
    /// Validate the provider configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            ProviderConfig::Cloudflare {
                api_token,
                timeout_secs,
                ..
            } => {
                if api_token.is_empty() {
                    return Err(crate::Error::config("Cloudflare API token cannot be empty"));
                }
                if *timeout_secs == 0 || *timeout_secs > 120 {
                    return Err(crate::Error::config(format!(
                        "Provider timeout must be between 1 and 120 seconds. Got: {}",
                        timeout_secs
                    )));
                }
                Ok(())
            }
            ProviderConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom provider factory cannot be empty",
                    ));
                }
                if config.is_null() {
                    return Err(crate::Error::config(
                        "Custom provider config cannot be null",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Get the provider type name
    pub fn type_name(&self) -> &str {
        match self {
            ProviderConfig::Cloudflare { .. } => "cloudflare",
            ProviderConfig::Custom { factory, .. } => factory,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Cloudflare {
            api_token: String::new(),
            api_base: None,
            timeout_secs: default_provider_timeout_secs(),
            dry_run: false,
        }
    }
}

fn default_provider_timeout_secs() -> u64 {
    30
}

/// Config store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// JSON file store
    File {
        /// Path to the store file
        path: String,
    },

    /// In-memory store (not persistent)
    #[default]
    Memory,
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StoreConfig::File { path } if path.trim().is_empty() => {
                Err(crate::Error::config("Store path cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Run one cycle as soon as a config is registered
    ///
    /// Off by default so a bulk import or a restart does not fire every
    /// config at once; the first cycle then happens one interval later.
    #[serde(default)]
    pub reconcile_on_register: bool,

    /// Upper bound on reconciliation cycles running at the same time
    #[serde(default = "default_max_concurrent_cycles")]
    pub max_concurrent_cycles: usize,

    /// Capacity of the engine event broadcast channel
    ///
    /// Slow subscribers lose the oldest events; cycles never wait on them.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// How long shutdown waits for timer tasks to finish
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_concurrent_cycles == 0 {
            return Err(crate::Error::config("max_concurrent_cycles must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("event_channel_capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reconcile_on_register: false,
            max_concurrent_cycles: default_max_concurrent_cycles(),
            event_channel_capacity: default_event_channel_capacity(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

fn default_max_concurrent_cycles() -> usize {
    8
}

fn default_event_channel_capacity() -> usize {
    256
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}
