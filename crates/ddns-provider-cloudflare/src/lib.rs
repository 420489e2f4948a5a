// # Cloudflare DNS Provider
//
// Cloudflare API v4 implementation of `DnsProvider`: zone listing and
// A/AAAA record CRUD.
//
// ## Trust Level: Untrusted (DNS Provider)
//
// The provider is stateless and single-shot:
// - One HTTP request per operation (plus pagination for listings)
// - No retries, backoff or caching; the next scheduler tick is the retry
// - No background tasks
//
// In dry-run mode writes are not sent. They are kept in a local overlay
// that later reads consult, so a dry-run config settles like a live one.
//
// ## Security Requirements
//
// - API token NEVER appears in logs or `Debug` output
// - Construction fails if the token is empty
//
// ## Error Mapping
//
// | HTTP / API error                          | `Error`          |
// |-------------------------------------------|------------------|
// | 401, 403                                  | `Authentication` |
// | 404, codes 7003 / 81044                   | `NotFound`       |
// | 409, codes 81053 / 81057 / 81058          | `Conflict`       |
// | other 400                                 | `Validation`     |
// | 429                                       | `RateLimited`    |
// | 5xx, transport errors, `success: false`   | `Provider`       |
//
// ## API Reference
//
// - List zones: GET `/zones`
// - List records: GET `/zones/:zone_id/dns_records?type=A`
// - Get record: GET `/zones/:zone_id/dns_records/:record_id`
// - Create record: POST `/zones/:zone_id/dns_records`
// - Update record: PATCH `/zones/:zone_id/dns_records/:record_id`
// - Delete record: DELETE `/zones/:zone_id/dns_records/:record_id`

use async_trait::async_trait;
use ddns_core::config::ProviderConfig;
use ddns_core::model::{DnsRecord, DnsRecordPatch, NewDnsRecord, RecordType, Zone};
use ddns_core::traits::{DnsProvider, DnsProviderFactory};
use ddns_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Cloudflare API base URL
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

const PROVIDER: &str = "cloudflare";

/// Largest page Cloudflare serves for zone and record listings
const PAGE_SIZE: u32 = 100;

/// "Record already exists" family of API error codes
const DUPLICATE_RECORD_CODES: &[u64] = &[81053, 81057, 81058];

/// Invalid object identifier / record does not exist
const MISSING_OBJECT_CODES: &[u64] = &[7003, 81044];

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
    #[serde(default)]
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: u64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    #[serde(default)]
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct CfZone {
    id: String,
    name: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CfRecord {
    id: String,
    #[serde(default)]
    zone_id: Option<String>,
    #[serde(rename = "type")]
    record_type: String,
    name: String,
    content: String,
    #[serde(default = "automatic_ttl")]
    ttl: u32,
    #[serde(default)]
    proxied: bool,
    #[serde(default)]
    comment: Option<String>,
}

fn automatic_ttl() -> u32 {
    1
}

impl CfRecord {
    /// Address records only; anything else is `None`
    fn into_record(self, zone_id: &str) -> Option<DnsRecord> {
        let record_type = self.record_type.parse::<RecordType>().ok()?;
        Some(DnsRecord {
            id: self.id,
            zone_id: self.zone_id.unwrap_or_else(|| zone_id.to_string()),
            record_type,
            name: self.name,
            content: self.content,
            ttl: self.ttl,
            proxied: self.proxied,
            comment: self.comment,
        })
    }
}

#[derive(Debug, Serialize)]
struct CreateRecordBody<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: &'a str,
    ttl: u32,
    proxied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<&'a str>,
}

/// Cloudflare DNS provider
///
/// # Dry-Run Mode
///
/// When `dry_run` is true, the provider will:
/// - Perform all GET requests (zones, records)
/// - Log the intended POST/PATCH/DELETE payload
/// - **NOT** actually modify DNS records
pub struct CloudflareProvider {
    /// Cloudflare API token
    /// ⚠️ NEVER log this value
    api_token: String,

    /// API root, without trailing slash
    api_base: String,

    /// HTTP client for API requests
    client: reqwest::Client,

    /// Dry-run mode: reads go out, writes are only logged
    dry_run: bool,

    /// Dry-run writes keyed by (zone id, record id)
    overlay: Mutex<HashMap<(String, String), DnsRecord>>,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for CloudflareProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareProvider")
            .field("api_token", &"<REDACTED>")
            .field("api_base", &self.api_base)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl CloudflareProvider {
    /// Create a new Cloudflare provider
    ///
    /// # Parameters
    ///
    /// - `api_token`: Cloudflare API token with Zone:DNS:Edit permissions
    /// - `api_base`: API root override (defaults to the public v4 endpoint)
    /// - `timeout`: per-request timeout
    /// - `dry_run`: If true, perform GET requests but skip writes
    ///
    /// # Returns
    ///
    /// - `Err(Error::Authentication)`: the token is empty
    /// - `Err(Error::Http)`: the HTTP client could not be built
    pub fn new(
        api_token: impl Into<String>,
        api_base: Option<String>,
        timeout: Duration,
        dry_run: bool,
    ) -> Result<Self> {
        let api_token = api_token.into();
        if api_token.trim().is_empty() {
            return Err(Error::auth("Cloudflare API token cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        let api_base = api_base
            .unwrap_or_else(|| CLOUDFLARE_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            api_token,
            api_base,
            client,
            dry_run,
            overlay: Mutex::new(HashMap::new()),
        })
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn overlay(&self) -> MutexGuard<'_, HashMap<(String, String), DnsRecord>> {
        self.overlay.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn overlay_get(&self, zone_id: &str, record_id: &str) -> Option<DnsRecord> {
        self.overlay()
            .get(&(zone_id.to_string(), record_id.to_string()))
            .cloned()
    }

    fn overlay_put(&self, record: DnsRecord) {
        self.overlay()
            .insert((record.zone_id.clone(), record.id.clone()), record);
    }

    fn records_url(&self, zone_id: &str) -> String {
        format!("{}/zones/{}/dns_records", self.api_base, zone_id)
    }

    fn record_url(&self, zone_id: &str, record_id: &str) -> String {
        format!("{}/zones/{}/dns_records/{}", self.api_base, zone_id, record_id)
    }

    /// Send a request and unwrap the API envelope
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<Envelope<T>> {
        let response = request
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| Error::provider(PROVIDER, format!("{} request failed: {}", what, e)))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            Error::provider(PROVIDER, format!("{} response unreadable: {}", what, e))
        })?;

        let parsed = serde_json::from_str::<Envelope<T>>(&body);
        match parsed {
            Ok(envelope) if (200..300).contains(&status) && envelope.success => Ok(envelope),
            Ok(envelope) => Err(map_failure(status, &envelope.errors, what)),
            Err(_) if !(200..300).contains(&status) => Err(map_failure(status, &[], what)),
            Err(e) => Err(Error::provider(
                PROVIDER,
                format!("{} returned an unexpected body: {}", what, e),
            )),
        }
    }

    /// Collect every page of a listing
    async fn list_all<T: DeserializeOwned>(
        &self,
        url: &str,
        filter: &[(&str, &str)],
        what: &str,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page = 1u32;

        loop {
            let page_param = page.to_string();
            let per_page = PAGE_SIZE.to_string();
            let request = self
                .client
                .get(url)
                .query(filter)
                .query(&[("page", page_param.as_str()), ("per_page", per_page.as_str())]);

            let envelope: Envelope<Vec<T>> = self.send(request, what).await?;
            items.extend(envelope.result.unwrap_or_default());

            match envelope.result_info {
                Some(info) if page < info.total_pages => page += 1,
                _ => break,
            }
        }

        Ok(items)
    }
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    async fn list_zones(&self) -> Result<Vec<Zone>> {
        let url = format!("{}/zones", self.api_base);
        let zones: Vec<CfZone> = self.list_all(&url, &[], "zone listing").await?;
        tracing::debug!("Cloudflare returned {} zones", zones.len());

        Ok(zones
            .into_iter()
            .map(|z| Zone {
                id: z.id,
                name: z.name,
                status: z.status,
            })
            .collect())
    }

    async fn list_records(&self, zone_id: &str, types: &[RecordType]) -> Result<Vec<DnsRecord>> {
        require_id("zone_id", zone_id)?;
        let url = self.records_url(zone_id);
        let types = if types.is_empty() {
            &[RecordType::A, RecordType::Aaaa][..]
        } else {
            types
        };

        let mut records = Vec::new();
        for record_type in types {
            let raw: Vec<CfRecord> = self
                .list_all(&url, &[("type", record_type.as_str())], "record listing")
                .await?;
            records.extend(raw.into_iter().filter_map(|r| r.into_record(zone_id)));
        }

        if self.dry_run {
            let overlay = self.overlay();
            for record in &mut records {
                if let Some(pending) = overlay.get(&(zone_id.to_string(), record.id.clone())) {
                    *record = pending.clone();
                }
            }
            let known: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
            records.extend(
                overlay
                    .values()
                    .filter(|r| r.zone_id == zone_id && types.contains(&r.record_type))
                    .filter(|r| !known.contains(&r.id))
                    .cloned(),
            );
        }

        tracing::debug!("Zone {} has {} address records", zone_id, records.len());
        Ok(records)
    }

    async fn get_record(&self, zone_id: &str, record_id: &str) -> Result<DnsRecord> {
        require_id("zone_id", zone_id)?;
        require_id("record_id", record_id)?;

        if self.dry_run
            && let Some(pending) = self.overlay_get(zone_id, record_id)
        {
            return Ok(pending);
        }

        let request = self.client.get(self.record_url(zone_id, record_id));
        let envelope: Envelope<CfRecord> = self.send(request, "record lookup").await?;
        let raw = envelope
            .result
            .ok_or_else(|| Error::not_found(format!("DNS record not found: {}", record_id)))?;

        let kind = raw.record_type.clone();
        raw.into_record(zone_id).ok_or_else(|| {
            Error::provider(
                PROVIDER,
                format!("record {} is {}, not an address record", record_id, kind),
            )
        })
    }

    async fn create_record(&self, zone_id: &str, record: &NewDnsRecord) -> Result<DnsRecord> {
        require_id("zone_id", zone_id)?;
        record.validate()?;

        let body = CreateRecordBody {
            record_type: record.record_type.as_str(),
            name: &record.name,
            content: &record.content,
            ttl: record.ttl,
            proxied: record.proxied,
            comment: record.comment.as_deref(),
        };

        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would POST {} with payload: {}",
                self.records_url(zone_id),
                serde_json::to_string(&body).unwrap_or_default()
            );
            let created = DnsRecord {
                id: format!("dry-run-{}-{}", record.record_type, record.name),
                zone_id: zone_id.to_string(),
                record_type: record.record_type,
                name: record.name.clone(),
                content: record.content.clone(),
                ttl: record.ttl,
                proxied: record.proxied,
                comment: record.comment.clone(),
            };
            self.overlay_put(created.clone());
            return Ok(created);
        }

        let request = self.client.post(self.records_url(zone_id)).json(&body);
        let envelope: Envelope<CfRecord> = self.send(request, "record creation").await?;
        let created = envelope
            .result
            .and_then(|r| r.into_record(zone_id))
            .ok_or_else(|| Error::provider(PROVIDER, "record creation returned no record"))?;

        tracing::info!(
            "Created {} record {} -> {}",
            created.record_type,
            created.name,
            created.content
        );
        Ok(created)
    }

    async fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        patch: &DnsRecordPatch,
    ) -> Result<DnsRecord> {
        require_id("zone_id", zone_id)?;
        require_id("record_id", record_id)?;
        patch.validate()?;

        if self.dry_run {
            let mut current = self.get_record(zone_id, record_id).await?;
            tracing::info!(
                "[DRY-RUN] Would PATCH {} with payload: {}",
                self.record_url(zone_id, record_id),
                serde_json::to_string(patch).unwrap_or_default()
            );
            if let Some(content) = &patch.content {
                current.content = content.clone();
            }
            if let Some(name) = &patch.name {
                current.name = name.clone();
            }
            if let Some(ttl) = patch.ttl {
                current.ttl = ttl;
            }
            if let Some(proxied) = patch.proxied {
                current.proxied = proxied;
            }
            if let Some(comment) = &patch.comment {
                current.comment = Some(comment.clone());
            }
            self.overlay_put(current.clone());
            return Ok(current);
        }

        let request = self
            .client
            .patch(self.record_url(zone_id, record_id))
            .json(patch);
        let envelope: Envelope<CfRecord> = self.send(request, "record update").await?;
        let updated = envelope
            .result
            .and_then(|r| r.into_record(zone_id))
            .ok_or_else(|| Error::provider(PROVIDER, "record update returned no record"))?;

        tracing::info!("DNS record updated: {} -> {}", updated.name, updated.content);
        Ok(updated)
    }

    async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<()> {
        require_id("zone_id", zone_id)?;
        require_id("record_id", record_id)?;

        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would DELETE {}",
                self.record_url(zone_id, record_id)
            );
            self.overlay()
                .remove(&(zone_id.to_string(), record_id.to_string()));
            return Ok(());
        }

        let request = self.client.delete(self.record_url(zone_id, record_id));
        let _: Envelope<serde_json::Value> = self.send(request, "record deletion").await?;
        tracing::info!("Deleted DNS record {}", record_id);
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

/// Path segments are interpolated into URLs, so they must be non-empty and slash-free
fn require_id(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() || value.contains('/') {
        return Err(Error::validation(format!("{} '{}' is not a valid id", field, value)));
    }
    Ok(())
}

fn describe(errors: &[ApiMessage]) -> String {
    if errors.is_empty() {
        return "no error detail".to_string();
    }
    errors
        .iter()
        .map(|e| format!("{}: {}", e.code, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Map a failed API call onto the shared error taxonomy
fn map_failure(status: u16, errors: &[ApiMessage], what: &str) -> Error {
    let has_code = |codes: &[u64]| errors.iter().any(|e| codes.contains(&e.code));
    let detail = describe(errors);

    match status {
        401 | 403 => Error::auth(format!(
            "{} rejected ({}): invalid API token or insufficient permissions ({})",
            what, status, detail
        )),
        404 => Error::not_found(format!("{} failed: {}", what, detail)),
        409 => Error::conflict(format!("{} failed: {}", what, detail)),
        400 if has_code(DUPLICATE_RECORD_CODES) => {
            Error::conflict(format!("{} failed: {}", what, detail))
        }
        400 if has_code(MISSING_OBJECT_CODES) => {
            Error::not_found(format!("{} failed: {}", what, detail))
        }
        400 => Error::validation(format!("{} rejected: {}", what, detail)),
        429 => Error::rate_limited(format!("{}: please retry later", what)),
        500..=599 => Error::provider(
            PROVIDER,
            format!("server error (transient) {} during {}: {}", status, what, detail),
        ),
        _ => Error::provider(
            PROVIDER,
            format!("{} failed with status {}: {}", what, status, detail),
        ),
    }
}

/// Factory for creating Cloudflare providers
pub struct CloudflareFactory;

impl DnsProviderFactory for CloudflareFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn DnsProvider>> {
        match config {
            ProviderConfig::Cloudflare {
                api_token,
                api_base,
                timeout_secs,
                dry_run,
            } => {
                config.validate()?;

                // DDNS_MODE=dry-run forces dry-run regardless of config
                let dry_run = *dry_run
                    || std::env::var("DDNS_MODE")
                        .map(|mode| mode.eq_ignore_ascii_case("dry-run"))
                        .unwrap_or(false);

                if dry_run {
                    tracing::warn!(
                        "Cloudflare provider running in DRY-RUN mode - no changes will be made"
                    );
                }

                Ok(Box::new(CloudflareProvider::new(
                    api_token.clone(),
                    api_base.clone(),
                    Duration::from_secs(*timeout_secs),
                    dry_run,
                )?))
            }
            _ => Err(Error::config("Invalid config for Cloudflare provider")),
        }
    }
}

/// Register the Cloudflare provider with a registry
///
/// # Example
///
/// ```rust
/// use ddns_core::ProviderRegistry;
///
/// let registry = ProviderRegistry::new();
/// ddns_provider_cloudflare::register(&registry);
/// assert!(registry.has_provider("cloudflare"));
/// ```
pub fn register(registry: &ddns_core::ProviderRegistry) {
    registry.register_provider(PROVIDER, Box::new(CloudflareFactory));
}
