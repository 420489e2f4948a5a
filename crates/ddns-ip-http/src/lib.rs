// # HTTP IP Resolver
//
// Discovers the host's public address by asking plain-text "what is my IP"
// services (api4.ipify.org, icanhazip.com, ...).
//
// ## Behaviour
//
// - One HTTP client per address family, bound to the unspecified address of
//   that family so an IPv4 lookup cannot leave over IPv6 and vice versa
// - Endpoints are tried in order; the first one answering with an address
//   of the requested family wins
// - No caching and no background polling: the scheduler decides when to ask

use ddns_core::ProviderRegistry;
use ddns_core::config::ResolverConfig;
use ddns_core::model::AddressFamily;
use ddns_core::traits::{IpResolver, IpResolverFactory};
use ddns_core::{Error, Result};

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

/// Longest body accepted from a discovery service
const MAX_BODY_LEN: usize = 256;

/// Public-IP resolver backed by HTTP discovery services
#[derive(Debug)]
pub struct HttpIpResolver {
    ipv4_urls: Vec<String>,
    ipv6_urls: Vec<String>,
    ipv4_client: reqwest::Client,
    ipv6_client: reqwest::Client,
}

impl HttpIpResolver {
    /// Create a resolver
    ///
    /// # Parameters
    ///
    /// - `ipv4_urls`: endpoints for IPv4 lookups, tried in order
    /// - `ipv6_urls`: endpoints for IPv6 lookups, tried in order
    /// - `timeout`: per-request timeout
    pub fn new(ipv4_urls: Vec<String>, ipv6_urls: Vec<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            ipv4_urls,
            ipv6_urls,
            ipv4_client: build_client(IpAddr::V4(Ipv4Addr::UNSPECIFIED), timeout)?,
            ipv6_client: build_client(IpAddr::V6(Ipv6Addr::UNSPECIFIED), timeout)?,
        })
    }

    fn endpoints(&self, family: AddressFamily) -> (&[String], &reqwest::Client) {
        match family {
            AddressFamily::Ipv4 => (&self.ipv4_urls, &self.ipv4_client),
            AddressFamily::Ipv6 => (&self.ipv6_urls, &self.ipv6_client),
        }
    }

    async fn fetch(client: &reqwest::Client, url: &str, family: AddressFamily) -> Result<IpAddr> {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::resolution(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::resolution(format!("HTTP {}", response.status())));
        }

        let text = response
            .text()
            .await
            .map_err(|e| Error::resolution(format!("failed to read response: {}", e)))?;

        parse_ip_response(&text, family)
    }
}

fn build_client(local: IpAddr, timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .local_address(local)
        .build()
        .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))
}

/// Parse a discovery service body into an address of `family`
pub fn parse_ip_response(body: &str, family: AddressFamily) -> Result<IpAddr> {
    let text = body.trim();
    if text.len() > MAX_BODY_LEN {
        return Err(Error::resolution(format!(
            "response too long ({} bytes)",
            text.len()
        )));
    }

    let ip: IpAddr = text
        .parse()
        .map_err(|_| Error::resolution(format!("invalid IP address: '{}'", text)))?;

    if !family.matches(&ip) {
        return Err(Error::resolution(format!("expected {}, got {}", family, ip)));
    }
    Ok(ip)
}

#[async_trait::async_trait]
impl IpResolver for HttpIpResolver {
    async fn resolve(&self, family: AddressFamily) -> Result<IpAddr> {
        let (urls, client) = self.endpoints(family);
        if urls.is_empty() {
            return Err(Error::resolution(format!(
                "no {} discovery endpoints configured",
                family
            )));
        }

        let mut failures = Vec::with_capacity(urls.len());
        for url in urls {
            match Self::fetch(client, url, family).await {
                Ok(ip) => {
                    tracing::debug!("Resolved {} address {} via {}", family, ip, url);
                    return Ok(ip);
                }
                Err(e) => {
                    tracing::warn!("{} lookup via {} failed: {}", family, url, e);
                    failures.push(format!("{}: {}", url, e));
                }
            }
        }

        Err(Error::resolution(format!(
            "all {} endpoints failed ({})",
            family,
            failures.join("; ")
        )))
    }

    fn resolver_name(&self) -> &'static str {
        "http"
    }
}

/// Factory for creating HTTP IP resolvers
pub struct HttpResolverFactory;

impl IpResolverFactory for HttpResolverFactory {
    fn create(&self, config: &ResolverConfig) -> Result<Box<dyn IpResolver>> {
        match config {
            ResolverConfig::Http {
                ipv4_urls,
                ipv6_urls,
                timeout_secs,
            } => {
                config.validate()?;
                Ok(Box::new(HttpIpResolver::new(
                    ipv4_urls.clone(),
                    ipv6_urls.clone(),
                    Duration::from_secs(*timeout_secs),
                )?))
            }
            _ => Err(Error::config("Invalid config for HTTP IP resolver")),
        }
    }
}

/// Register the HTTP IP resolver with a registry
pub fn register(registry: &ProviderRegistry) {
    registry.register_resolver("http", Box::new(HttpResolverFactory));
}
