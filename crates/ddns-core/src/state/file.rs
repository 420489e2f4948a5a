// # File Config Store
//
// File-based implementation of ConfigStore with crash recovery.
//
// ## Purpose
//
// Keeps the full config collection across daemon restarts so interval
// schedules resume where they left off.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Automatic backup: Keeps .backup of the previous file
// - Recovery: Falls back to backup if the main file does not parse
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "configs": {
//     "6f1c...": {
//       "id": "6f1c...",
//       "zone_id": "023e105f4ecef8ad9ca31a8372d0c353",
//       "record_id": "372e67954025e0ba6aaa6d586b9e0b59",
//       "record_name": "home.example.com",
//       "address_family": "ipv4",
//       "update_interval_seconds": 300,
//       "ttl": 120,
//       "proxied": false,
//       "status": "ok",
//       "current_ip": "1.2.3.4",
//       "last_update_time": "2025-01-09T12:00:00Z",
//       "last_error": null
//     }
//   }
// }
// ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use super::ConfigTable;
use crate::Error;
use crate::model::{DdnsConfig, DdnsConfigPatch, StatusUpdate};
use crate::traits::ConfigStore;

/// Store file format version
const STORE_FILE_VERSION: &str = "1.0";

/// File-based config store with crash recovery
///
/// Every mutation is applied to a copy of the table, written to disk, and
/// only then made visible. A failed write leaves both disk and memory
/// unchanged.
///
/// # Example
///
/// ```rust,no_run
/// use ddns_core::state::FileConfigStore;
/// use ddns_core::traits::ConfigStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileConfigStore::new("/var/lib/ddns/configs.json").await?;
///     for config in store.list().await? {
///         println!("{} -> {:?}", config.record_name, config.status);
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    table: RwLock<ConfigTable>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StoreFileFormat {
    version: String,
    configs: ConfigTable,
}

/// Why a load failed
enum LoadError {
    /// File exists but does not parse
    Corrupt(Error),
    /// File could not be read
    Unreadable(Error),
}

impl FileConfigStore {
    /// Create or load a file config store
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Load the existing file
    /// 3. If it does not parse, load the backup instead
    /// 4. If both fail to parse, start empty
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let table = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            table: RwLock::new(table),
        })
    }

    /// Path of the main store file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_with_recovery(path: &Path) -> Result<ConfigTable, Error> {
        match Self::load(path).await {
            Ok(table) => {
                tracing::debug!("Loaded config store: {} configs", table.len());
                Ok(table)
            }
            Err(LoadError::Unreadable(e)) => Err(e),
            Err(LoadError::Corrupt(e)) => {
                tracing::warn!(
                    "Config store appears corrupted: {}. Attempting recovery from backup.",
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with empty config store.");
                    return Ok(ConfigTable::default());
                }

                match Self::load(&backup_path).await {
                    Ok(table) => {
                        tracing::info!("Recovered config store from backup: {} configs", table.len());
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            tracing::error!(
                                "Failed to restore store file from backup: {}",
                                restore_err
                            );
                        }
                        Ok(table)
                    }
                    Err(LoadError::Corrupt(backup_err)) | Err(LoadError::Unreadable(backup_err)) => {
                        tracing::error!(
                            "Backup also unusable: {}. Starting with empty config store.",
                            backup_err
                        );
                        Ok(ConfigTable::default())
                    }
                }
            }
        }
    }

    async fn load(path: &Path) -> Result<ConfigTable, LoadError> {
        if !path.exists() {
            tracing::debug!("Store file does not exist: {}", path.display());
            return Ok(ConfigTable::default());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            LoadError::Unreadable(Error::state_store(format!(
                "Failed to read store file {}: {}",
                path.display(),
                e
            )))
        })?;

        let file: StoreFileFormat = serde_json::from_str(&content).map_err(|e| {
            LoadError::Corrupt(Error::state_store(format!(
                "Failed to parse store file {}: {}",
                path.display(),
                e
            )))
        })?;

        if file.version != STORE_FILE_VERSION {
            tracing::warn!(
                "Store file version mismatch: expected {}, got {}. Attempting to load anyway.",
                STORE_FILE_VERSION,
                file.version
            );
        }

        Ok(file.configs)
    }

    /// Write `table` to disk atomically
    async fn write(&self, table: &ConfigTable) -> Result<(), Error> {
        let file = StoreFileFormat {
            version: STORE_FILE_VERSION.to_string(),
            configs: table.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::state_store(format!("Failed to serialize configs: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut out = fs::File::create(&temp_path).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            out.write_all(json.as_bytes()).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            out.sync_all().await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists()
            && let Err(e) = fs::copy(&self.path, Self::backup_path(&self.path)).await
        {
            tracing::warn!("Failed to create backup: {}", e);
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Config store written: {}", self.path.display());
        Ok(())
    }

    /// Apply `change` to a copy of the table, persist it, then publish it
    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut ConfigTable) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut guard = self.table.write().await;
        let mut next = guard.clone();
        let out = change(&mut next)?;
        if next != *guard {
            self.write(&next).await?;
            *guard = next;
        }
        Ok(out)
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn get(&self, id: &str) -> Result<Option<DdnsConfig>, Error> {
        Ok(self.table.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<DdnsConfig>, Error> {
        Ok(self.table.read().await.list())
    }

    async fn insert(&self, config: DdnsConfig) -> Result<(), Error> {
        self.mutate(|table| table.insert(config)).await
    }

    async fn apply_status(
        &self,
        id: &str,
        update: &StatusUpdate,
    ) -> Result<Option<DdnsConfig>, Error> {
        self.mutate(|table| table.apply_status(id, update)).await
    }

    async fn update_settings(
        &self,
        id: &str,
        patch: &DdnsConfigPatch,
    ) -> Result<Option<DdnsConfig>, Error> {
        self.mutate(|table| Ok(table.update_settings(id, patch))).await
    }

    async fn remove(&self, id: &str) -> Result<Option<DdnsConfig>, Error> {
        self.mutate(|table| Ok(table.remove(id))).await
    }

    async fn find_by_record_id(&self, record_id: &str) -> Result<Option<DdnsConfig>, Error> {
        Ok(self.table.read().await.find_by_record_id(record_id).cloned())
    }

    async fn flush(&self) -> Result<(), Error> {
        let guard = self.table.read().await;
        self.write(&guard).await
    }
}
