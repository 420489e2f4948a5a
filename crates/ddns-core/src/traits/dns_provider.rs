// # DNS Provider Trait
//
// Defines the interface to a remote DNS provider: zone listing and
// address record CRUD.
//
// ## Implementations
//
// - Cloudflare: `ddns-provider-cloudflare` crate
//
// ## Usage
//
// ```rust,ignore
// use ddns_core::{DnsProvider, DnsRecordPatch};
//
// let record = provider.get_record("zone-id", "record-id").await?;
// if record.ip() != Some(current) {
//     provider
//         .update_record("zone-id", &record.id, &DnsRecordPatch::content(current))
//         .await?;
// }
// ```

use async_trait::async_trait;

use crate::model::{DnsRecord, DnsRecordPatch, NewDnsRecord, RecordType, Zone};

/// Trait for DNS provider implementations
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks. One
/// instance is shared by every reconciliation cycle.
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Perform HTTP/HTTPS API calls to their endpoints only
/// - ✅ Parse provider-specific responses
/// - ✅ Return success or failure (the next tick is the retry)
///
/// ## Forbidden Capabilities
/// - ❌ Spawn tasks or threads
/// - ❌ Implement retry logic or backoff
/// - ❌ Access the config store
/// - ❌ Decide whether an update is needed (owned by the reconciler)
/// - ❌ Mutate the credential it was built with
///
/// # Error Mapping
///
/// - `Validation`: malformed request (missing name/content)
/// - `Authentication`: missing or rejected credential
/// - `NotFound`: zone or record does not exist
/// - `Conflict`: a record with the same name and type already exists
/// - `RateLimited` / `Provider`: upstream failure
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// List zones visible to the credential
    async fn list_zones(&self) -> Result<Vec<Zone>, crate::Error>;

    /// List address records in a zone
    ///
    /// # Parameters
    ///
    /// - `zone_id`: zone to list
    /// - `types`: record types to include; empty means A and AAAA
    async fn list_records(
        &self,
        zone_id: &str,
        types: &[RecordType],
    ) -> Result<Vec<DnsRecord>, crate::Error>;

    /// Read one record back by id
    ///
    /// # Returns
    ///
    /// - `Err(Error::NotFound)`: the record was deleted out-of-band
    async fn get_record(&self, zone_id: &str, record_id: &str) -> Result<DnsRecord, crate::Error>;

    /// Create a record
    async fn create_record(
        &self,
        zone_id: &str,
        record: &NewDnsRecord,
    ) -> Result<DnsRecord, crate::Error>;

    /// Partially update a record
    ///
    /// # Returns
    ///
    /// - `Ok(DnsRecord)`: the record after the update
    /// - `Err(Error::NotFound)`: `record_id` no longer exists
    async fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        patch: &DnsRecordPatch,
    ) -> Result<DnsRecord, crate::Error>;

    /// Delete a record
    ///
    /// Implementations report `NotFound` for an absent record; callers that
    /// want idempotent deletes map it to success.
    async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<(), crate::Error>;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}

/// Helper trait for constructing DNS providers from configuration
pub trait DnsProviderFactory: Send + Sync {
    /// Create a DnsProvider instance from configuration
    ///
    /// # Parameters
    ///
    /// - `config`: Configuration specific to this provider
    ///
    /// # Returns
    ///
    /// A boxed DnsProvider trait object
    fn create(
        &self,
        config: &crate::config::ProviderConfig,
    ) -> Result<Box<dyn DnsProvider>, crate::Error>;
}
