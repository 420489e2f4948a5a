// # Config Store Trait
//
// Durable mapping from config id to desired state and last-known status.
//
// ## Implementations
//
// - `MemoryConfigStore`: in-process, lost on restart
// - `FileConfigStore`: JSON file with atomic writes and backup recovery
//
// ## Atomicity
//
// Every mutating method is a single read-modify-write under the store's
// own lock. Status writes and settings writes touch disjoint fields, so a
// reconciliation cycle and an `update config` call never lose each other's
// changes.

use async_trait::async_trait;

use crate::model::{DdnsConfig, DdnsConfigPatch, StatusUpdate};

/// Trait for config persistence
///
/// # Trust Level: Trusted
///
/// The store is the single source of truth for configs. Reconciliation
/// tasks never keep their own copy beyond one cycle.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Get one config
    async fn get(&self, id: &str) -> Result<Option<DdnsConfig>, crate::Error>;

    /// All configs, ordered by id
    async fn list(&self) -> Result<Vec<DdnsConfig>, crate::Error>;

    /// Insert a new config
    ///
    /// # Returns
    ///
    /// - `Err(Error::Conflict)`: the id exists, or another config already
    ///   references the same `record_id`
    async fn insert(&self, config: DdnsConfig) -> Result<(), crate::Error>;

    /// Apply a reconciler outcome
    ///
    /// # Returns
    ///
    /// - `Ok(None)`: the config no longer exists; nothing is written
    /// - `Err(Error::Conflict)`: the update would bind a `record_id` that
    ///   another config already references
    async fn apply_status(
        &self,
        id: &str,
        update: &StatusUpdate,
    ) -> Result<Option<DdnsConfig>, crate::Error>;

    /// Apply a settings change
    ///
    /// # Returns
    ///
    /// - `Ok(None)`: the config does not exist
    async fn update_settings(
        &self,
        id: &str,
        patch: &DdnsConfigPatch,
    ) -> Result<Option<DdnsConfig>, crate::Error>;

    /// Remove a config, returning it if it existed
    async fn remove(&self, id: &str) -> Result<Option<DdnsConfig>, crate::Error>;

    /// Config referencing `record_id`, if any
    async fn find_by_record_id(&self, record_id: &str) -> Result<Option<DdnsConfig>, crate::Error>;

    /// Persist anything not yet on durable storage
    async fn flush(&self) -> Result<(), crate::Error>;
}
