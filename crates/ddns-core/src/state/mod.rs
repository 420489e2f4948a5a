// # Config Store Implementations
//
// Both stores keep a `ConfigTable` in memory and differ only in whether
// each change is also written to disk. The table enforces the config
// invariants (unique id, at most one config per record id, no writes to a
// removed config).

pub mod file;
pub mod memory;

pub use file::FileConfigStore;
pub use memory::MemoryConfigStore;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::model::{DdnsConfig, DdnsConfigPatch, FieldChange, StatusUpdate};
use crate::traits::ConfigStore;

/// Build the store described by `config`
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn ConfigStore>> {
    match config {
        StoreConfig::File { path } => Ok(Arc::new(FileConfigStore::new(path).await?)),
        StoreConfig::Memory => Ok(Arc::new(MemoryConfigStore::new())),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct ConfigTable {
    configs: BTreeMap<String, DdnsConfig>,
}

impl ConfigTable {
    pub(crate) fn len(&self) -> usize {
        self.configs.len()
    }

    pub(crate) fn get(&self, id: &str) -> Option<&DdnsConfig> {
        self.configs.get(id)
    }

    pub(crate) fn list(&self) -> Vec<DdnsConfig> {
        self.configs.values().cloned().collect()
    }

    pub(crate) fn insert(&mut self, config: DdnsConfig) -> Result<()> {
        if self.configs.contains_key(&config.id) {
            return Err(Error::conflict(format!(
                "config {} already exists",
                config.id
            )));
        }
        if let Some(record_id) = &config.record_id
            && let Some(owner) = self.record_owner(record_id, &config.id)
        {
            return Err(Error::conflict(format!(
                "record {} is already managed by config {}",
                record_id, owner
            )));
        }
        self.configs.insert(config.id.clone(), config);
        Ok(())
    }

    pub(crate) fn apply_status(
        &mut self,
        id: &str,
        update: &StatusUpdate,
    ) -> Result<Option<DdnsConfig>> {
        if let FieldChange::Set(record_id) = &update.record_id
            && let Some(owner) = self.record_owner(record_id, id)
        {
            return Err(Error::conflict(format!(
                "record {} is already managed by config {}",
                record_id, owner
            )));
        }
        Ok(self.configs.get_mut(id).map(|config| {
            update.apply_to(config);
            config.clone()
        }))
    }

    pub(crate) fn update_settings(
        &mut self,
        id: &str,
        patch: &DdnsConfigPatch,
    ) -> Option<DdnsConfig> {
        self.configs.get_mut(id).map(|config| {
            patch.apply_to(config);
            config.clone()
        })
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<DdnsConfig> {
        self.configs.remove(id)
    }

    pub(crate) fn find_by_record_id(&self, record_id: &str) -> Option<&DdnsConfig> {
        self.configs
            .values()
            .find(|c| c.record_id.as_deref() == Some(record_id))
    }

    /// Id of a config other than `except` that references `record_id`
    fn record_owner(&self, record_id: &str, except: &str) -> Option<&str> {
        self.configs
            .values()
            .find(|c| c.id != except && c.record_id.as_deref() == Some(record_id))
            .map(|c| c.id.as_str())
    }
}
