// # ddnsd - DDNS Daemon
//
// Thin integration layer around `ddns-core`:
// 1. Read configuration from environment variables
// 2. Initialize logging and the runtime
// 3. Register providers and IP resolvers
// 4. Seed configs from the environment, then run the engine until
//    SIGTERM/SIGINT
//
// No DNS or scheduling logic lives here.
//
// ## Configuration
//
// ### DNS Provider
// - `DDNS_PROVIDER_TYPE`: Provider type (cloudflare)
// - `DDNS_PROVIDER_API_TOKEN`: API token (required)
// - `DDNS_PROVIDER_API_BASE`: API root override
// - `DDNS_PROVIDER_TIMEOUT_SECS`: Per-request timeout (default 30)
// - `DDNS_MODE`: `dry-run` reads for real and only logs writes
//
// ### IP Resolver
// - `DDNS_RESOLVER_IPV4_URLS`: Comma-separated IPv4 discovery endpoints
// - `DDNS_RESOLVER_IPV6_URLS`: Comma-separated IPv6 discovery endpoints
// - `DDNS_RESOLVER_TIMEOUT_SECS`: Per-request timeout (default 10)
//
// ### Config Store
// - `DDNS_STORE_TYPE`: file (default) or memory
// - `DDNS_STORE_PATH`: Path to the store file (required for file)
//
// ### Engine
// - `DDNS_RECONCILE_ON_REGISTER`: Check each config as soon as it is scheduled
// - `DDNS_MAX_CONCURRENT_CYCLES`: Cap on cycles running at once (default 8)
// - `DDNS_LOG_LEVEL`: trace, debug, info (default), warn, error
//
// ### Seed configs
// - `DDNS_ZONE_ID`, `DDNS_RECORD_NAME`, `DDNS_RECORD_ID`, `DDNS_UPDATE_INTERVAL`
// - `DDNS_ZONE_ID_V6`, `DDNS_RECORD_NAME_V6`, `DDNS_RECORD_ID_V6`,
//   `DDNS_UPDATE_INTERVAL_V6` (zone and interval fall back to the IPv4 values)
//
// ## Example
//
// ```bash
// export DDNS_PROVIDER_API_TOKEN=your_token
// export DDNS_STORE_PATH=/var/lib/ddns/configs.json
// export DDNS_ZONE_ID=023e105f4ecef8ad9ca31a8372d0c353
// export DDNS_RECORD_NAME=home.example.com
//
// ddnsd
// ```

use anyhow::{Context, Result};
use ddns_core::config::{DEFAULT_IPV4_URLS, DEFAULT_IPV6_URLS};
use ddns_core::model::DEFAULT_UPDATE_INTERVAL_SECS;
use ddns_core::{
    AddressFamily, DdnsEngine, DdnsSettings, EngineConfig, NewDdnsConfig, ProviderConfig,
    ResolverConfig, StoreConfig,
};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum DdnsExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<DdnsExitCode> for ExitCode {
    fn from(code: DdnsExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    provider_type: String,
    provider_api_token: String,
    provider_api_base: Option<String>,
    provider_timeout_secs: u64,
    dry_run: bool,
    resolver_ipv4_urls: Vec<String>,
    resolver_ipv6_urls: Vec<String>,
    resolver_timeout_secs: u64,
    store_type: String,
    store_path: Option<String>,
    reconcile_on_register: bool,
    max_concurrent_cycles: usize,
    log_level: String,
    seeds: Vec<NewDdnsConfig>,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("provider_type", &self.provider_type)
            .field("provider_api_token", &"<REDACTED>")
            .field("provider_api_base", &self.provider_api_base)
            .field("provider_timeout_secs", &self.provider_timeout_secs)
            .field("dry_run", &self.dry_run)
            .field("resolver_ipv4_urls", &self.resolver_ipv4_urls)
            .field("resolver_ipv6_urls", &self.resolver_ipv6_urls)
            .field("resolver_timeout_secs", &self.resolver_timeout_secs)
            .field("store_type", &self.store_type)
            .field("store_path", &self.store_path)
            .field("reconcile_on_register", &self.reconcile_on_register)
            .field("max_concurrent_cycles", &self.max_concurrent_cycles)
            .field("log_level", &self.log_level)
            .field("seeds", &self.seeds)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `get`, which returns a variable's value
    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let seeds = seeds_from(&get)?;

        Ok(Self {
            provider_type: get("DDNS_PROVIDER_TYPE").unwrap_or_else(|| "cloudflare".to_string()),
            provider_api_token: get("DDNS_PROVIDER_API_TOKEN").unwrap_or_default(),
            provider_api_base: get("DDNS_PROVIDER_API_BASE"),
            provider_timeout_secs: parse_or(&get, "DDNS_PROVIDER_TIMEOUT_SECS", 30)?,
            dry_run: get("DDNS_MODE").is_some_and(|m| m.eq_ignore_ascii_case("dry-run")),
            resolver_ipv4_urls: list_or(&get, "DDNS_RESOLVER_IPV4_URLS", DEFAULT_IPV4_URLS),
            resolver_ipv6_urls: list_or(&get, "DDNS_RESOLVER_IPV6_URLS", DEFAULT_IPV6_URLS),
            resolver_timeout_secs: parse_or(&get, "DDNS_RESOLVER_TIMEOUT_SECS", 10)?,
            store_type: get("DDNS_STORE_TYPE").unwrap_or_else(|| "file".to_string()),
            store_path: get("DDNS_STORE_PATH"),
            reconcile_on_register: flag(&get, "DDNS_RECONCILE_ON_REGISTER")?,
            max_concurrent_cycles: parse_or(&get, "DDNS_MAX_CONCURRENT_CYCLES", 8)?,
            log_level: get("DDNS_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            seeds,
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.provider_api_token.is_empty() {
            anyhow::bail!(
                "DDNS_PROVIDER_API_TOKEN is required. \
                Set it via: export DDNS_PROVIDER_API_TOKEN=your_token"
            );
        }

        // Check for obvious placeholder tokens (common mistake)
        let token_lower = self.provider_api_token.to_lowercase();
        if token_lower.contains("your_token")
            || token_lower.contains("replace_me")
            || token_lower == "token"
        {
            anyhow::bail!(
                "DDNS_PROVIDER_API_TOKEN appears to be a placeholder. \
                Use an actual API token from your DNS provider."
            );
        }

        match self.provider_type.as_str() {
            "cloudflare" => {}
            _ => anyhow::bail!(
                "DDNS_PROVIDER_TYPE '{}' is not supported. \
                Supported providers: cloudflare",
                self.provider_type
            ),
        }

        match self.store_type.as_str() {
            "memory" => {}
            "file" if self.store_path.is_some() => {}
            "file" => anyhow::bail!(
                "DDNS_STORE_PATH is required when DDNS_STORE_TYPE=file. \
                Set it via: export DDNS_STORE_PATH=/var/lib/ddns/configs.json"
            ),
            _ => anyhow::bail!(
                "DDNS_STORE_TYPE '{}' is not supported. \
                Supported types: file, memory",
                self.store_type
            ),
        }

        for url in self
            .resolver_ipv4_urls
            .iter()
            .chain(&self.resolver_ipv6_urls)
        {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                anyhow::bail!(
                    "Resolver URL must use HTTP or HTTPS scheme. Got: {}",
                    url
                );
            }
            if url.starts_with("http://") {
                eprintln!(
                    "WARNING: resolver URL {} uses HTTP (not HTTPS). \
                    Answers can be spoofed on the path.",
                    url
                );
            }
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "DDNS_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        self.settings()
            .validate()
            .context("Invalid daemon configuration")?;

        for seed in &self.seeds {
            seed.validate().with_context(|| {
                format!(
                    "Invalid seed config for {} ({})",
                    seed.record_name, seed.address_family
                )
            })?;
        }

        Ok(())
    }

    /// Typed settings for the engine and its components
    fn settings(&self) -> DdnsSettings {
        DdnsSettings {
            resolver: ResolverConfig::Http {
                ipv4_urls: self.resolver_ipv4_urls.clone(),
                ipv6_urls: self.resolver_ipv6_urls.clone(),
                timeout_secs: self.resolver_timeout_secs,
            },
            provider: ProviderConfig::Cloudflare {
                api_token: self.provider_api_token.clone(),
                api_base: self.provider_api_base.clone(),
                timeout_secs: self.provider_timeout_secs,
                dry_run: self.dry_run,
            },
            store: match (self.store_type.as_str(), &self.store_path) {
                ("file", Some(path)) => StoreConfig::File { path: path.clone() },
                _ => StoreConfig::Memory,
            },
            engine: EngineConfig {
                reconcile_on_register: self.reconcile_on_register,
                max_concurrent_cycles: self.max_concurrent_cycles,
                ..EngineConfig::default()
            },
        }
    }

    fn log_level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

/// Configs described by `DDNS_ZONE_ID`/`DDNS_RECORD_NAME` and their `_V6` variants
fn seeds_from(get: &impl Fn(&str) -> Option<String>) -> Result<Vec<NewDdnsConfig>> {
    let interval = parse_or(get, "DDNS_UPDATE_INTERVAL", DEFAULT_UPDATE_INTERVAL_SECS)?;
    let mut seeds = Vec::new();

    if let (Some(zone), Some(name)) = (get("DDNS_ZONE_ID"), get("DDNS_RECORD_NAME")) {
        let mut seed = NewDdnsConfig::new(zone, name, AddressFamily::Ipv4, interval);
        seed.record_id = get("DDNS_RECORD_ID");
        seeds.push(seed);
    }

    let zone_v6 = get("DDNS_ZONE_ID_V6").or_else(|| get("DDNS_ZONE_ID"));
    if let (Some(zone), Some(name)) = (zone_v6, get("DDNS_RECORD_NAME_V6")) {
        let interval = parse_or(get, "DDNS_UPDATE_INTERVAL_V6", interval)?;
        let mut seed = NewDdnsConfig::new(zone, name, AddressFamily::Ipv6, interval);
        seed.record_id = get("DDNS_RECORD_ID_V6");
        seeds.push(seed);
    }

    Ok(seeds)
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} must be a number, got '{}': {}", key, raw, e)),
        None => Ok(default),
    }
}

fn flag(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<bool> {
    match get(key).map(|v| v.trim().to_lowercase()) {
        None => Ok(false),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => anyhow::bail!("{} must be true or false, got '{}'", key, v),
    }
}

fn list_or(get: &impl Fn(&str) -> Option<String>, key: &str, default: &[&str]) -> Vec<String> {
    match get(key) {
        Some(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return DdnsExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return DdnsExitCode::ConfigError.into();
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level())
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DdnsExitCode::ConfigError.into();
    }

    info!("Starting ddnsd daemon");
    info!("Configuration loaded: {} seed config(s)", config.seeds.len());

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DdnsExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {:#}", e);
            DdnsExitCode::RuntimeError
        } else {
            DdnsExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    let settings = config.settings();
    let registry = ddns_core::ProviderRegistry::new();

    #[cfg(feature = "cloudflare")]
    {
        info!("Registering Cloudflare provider");
        ddns_provider_cloudflare::register(&registry);
    }

    #[cfg(feature = "http")]
    {
        info!("Registering HTTP IP resolver");
        ddns_ip_http::register(&registry);
    }

    let provider = registry
        .create_provider(&settings.provider)
        .context("Failed to create DNS provider")?;
    let resolver = registry
        .create_resolver(&settings.resolver)
        .context("Failed to create IP resolver")?;
    let store = ddns_core::open_store(&settings.store)
        .await
        .context("Failed to open config store")?;

    info!(
        "Provider: {}, resolver: {}, store: {:?}",
        provider.provider_name(),
        resolver.resolver_name(),
        settings.store
    );

    let (engine, _events) = DdnsEngine::new(
        store,
        Arc::from(provider),
        Arc::from(resolver),
        settings.engine.clone(),
    )?;

    seed_configs(&engine, config.seeds).await?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => info!("Received shutdown signal: {}", signal),
            Err(e) => error!("Signal handling failed, shutting down: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    info!("Starting DDNS engine");
    engine.run_with_shutdown(Some(shutdown_rx)).await?;
    info!("Daemon stopped");
    Ok(())
}

/// Create seed configs that are not stored yet
async fn seed_configs(engine: &DdnsEngine, seeds: Vec<NewDdnsConfig>) -> Result<()> {
    let existing = engine.list_configs().await?;

    for seed in seeds {
        let known = existing.iter().any(|c| {
            c.address_family == seed.address_family && c.targets_name(&seed.record_name)
        });
        if known {
            info!(
                "Seed {} ({}) already stored, skipping",
                seed.record_name, seed.address_family
            );
            continue;
        }

        let name = seed.record_name.clone();
        match engine.create_config(seed).await {
            Ok(config) => info!("Seeded config {} for {}", config.id, name),
            Err(e) => warn!("Seed for {} not created: {}", name, e),
        }
    }

    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
