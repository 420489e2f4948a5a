// # Memory Config Store
//
// In-memory implementation of ConfigStore.
//
// ## Crash Behavior
//
// - All configs are lost on restart/crash
// - Suitable for tests and for daemons that re-seed configs from the
//   environment on every start

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::ConfigTable;
use crate::Error;
use crate::model::{DdnsConfig, DdnsConfigPatch, StatusUpdate};
use crate::traits::ConfigStore;

/// In-memory config store
///
/// Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    inner: Arc<RwLock<ConfigTable>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of configs in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.len() == 0
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, id: &str) -> Result<Option<DdnsConfig>, Error> {
        Ok(self.inner.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<DdnsConfig>, Error> {
        Ok(self.inner.read().await.list())
    }

    async fn insert(&self, config: DdnsConfig) -> Result<(), Error> {
        self.inner.write().await.insert(config)
    }

    async fn apply_status(
        &self,
        id: &str,
        update: &StatusUpdate,
    ) -> Result<Option<DdnsConfig>, Error> {
        self.inner.write().await.apply_status(id, update)
    }

    async fn update_settings(
        &self,
        id: &str,
        patch: &DdnsConfigPatch,
    ) -> Result<Option<DdnsConfig>, Error> {
        Ok(self.inner.write().await.update_settings(id, patch))
    }

    async fn remove(&self, id: &str) -> Result<Option<DdnsConfig>, Error> {
        Ok(self.inner.write().await.remove(id))
    }

    async fn find_by_record_id(&self, record_id: &str) -> Result<Option<DdnsConfig>, Error> {
        Ok(self.inner.read().await.find_by_record_id(record_id).cloned())
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}
