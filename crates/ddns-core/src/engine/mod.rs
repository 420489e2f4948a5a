//! Core DDNS engine
//!
//! The DdnsEngine is the one entry point for callers. It owns:
//! - the config store (desired state and status)
//! - the scheduler (one timer per config)
//! - the reconciler (one compare-and-update cycle)
//! - the provider and resolver, also reachable directly for passthrough
//!   operations
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!  callers ──────►│  DdnsEngine  │──── EngineEvent ───► subscribers
//!                 └──────────────┘
//!                    │        │
//!                    ▼        ▼
//!            ┌───────────┐  ┌────────────┐
//!            │ Scheduler │─►│ Reconciler │
//!            └───────────┘  └────────────┘
//!                              │   │   │
//!          ┌───────────────────┘   │   └──────────────────┐
//!          ▼                       ▼                      ▼
//!  ┌─────────────┐         ┌─────────────┐        ┌─────────────┐
//!  │ IpResolver  │         │ DnsProvider │        │ ConfigStore │
//!  └─────────────┘         └─────────────┘        └─────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! 1. Create with [`DdnsEngine::new()`]
//! 2. [`DdnsEngine::start()`] registers every stored config
//! 3. Create, update, delete and trigger configs while running
//! 4. [`DdnsEngine::shutdown()`] stops timers and flushes the store
//!
//! [`DdnsEngine::run()`] wraps 2 and 4 around a wait for Ctrl-C.

use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::model::{
    AddressFamily, DdnsConfig, DdnsConfigPatch, DnsRecord, DnsRecordPatch, NewDdnsConfig,
    NewDnsRecord, RecordType, StatusUpdate, Zone,
};
use crate::reconciler::{CycleOutcome, Reconciler};
use crate::scheduler::Scheduler;
use crate::traits::{ConfigStore, DnsProvider, IpResolver};

/// Events emitted by the DdnsEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine started with this many configs scheduled
    Started { configs_count: usize },

    /// Engine stopped
    Stopped { reason: String },

    /// Timer started for a config
    ConfigRegistered {
        config_id: String,
        interval_secs: u64,
    },

    /// Timer cancelled for a config
    ConfigDeregistered { config_id: String },

    /// Reconciliation cycle started
    CycleStarted { config_id: String },

    /// Missing record was created
    RecordCreated {
        config_id: String,
        record_id: String,
        ip: IpAddr,
    },

    /// Drift corrected
    RecordUpdated {
        config_id: String,
        record_id: String,
        previous: String,
        ip: IpAddr,
    },

    /// Record already pointed at the current IP
    RecordUnchanged { config_id: String, ip: IpAddr },

    /// Cycle ended in `status = error`
    CycleFailed { config_id: String, error: String },

    /// Config was deleted while its cycle ran; nothing was persisted
    CycleDiscarded { config_id: String },
}

/// Core DDNS engine
///
/// All methods take `&self`; share the engine behind an `Arc` to drive it
/// from several tasks.
pub struct DdnsEngine {
    store: Arc<dyn ConfigStore>,
    provider: Arc<dyn DnsProvider>,
    resolver: Arc<dyn IpResolver>,
    scheduler: Scheduler,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl DdnsEngine {
    /// Create a new DDNS engine
    ///
    /// # Parameters
    ///
    /// - `store`: config store
    /// - `provider`: DNS provider implementation
    /// - `resolver`: IP resolver implementation
    /// - `config`: engine settings
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        store: Arc<dyn ConfigStore>,
        provider: Arc<dyn DnsProvider>,
        resolver: Arc<dyn IpResolver>,
        config: EngineConfig,
    ) -> Result<(Self, broadcast::Receiver<EngineEvent>)> {
        Self::with_clock(store, provider, resolver, config, Arc::new(SystemClock))
    }

    /// Like [`DdnsEngine::new`], with an explicit wall clock for timestamps
    pub fn with_clock(
        store: Arc<dyn ConfigStore>,
        provider: Arc<dyn DnsProvider>,
        resolver: Arc<dyn IpResolver>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, broadcast::Receiver<EngineEvent>)> {
        config.validate()?;

        let (tx, rx) = broadcast::channel(config.event_channel_capacity);
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            provider.clone(),
            resolver.clone(),
            clock,
            tx.clone(),
        ));
        let scheduler = Scheduler::new(reconciler, &config, tx.clone());

        let engine = Self {
            store,
            provider,
            resolver,
            scheduler,
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Register every stored config with the scheduler
    ///
    /// Configs whose interval no longer validates are marked `error` and
    /// left unscheduled.
    pub async fn start(&self) -> Result<usize> {
        let configs = self.store.list().await?;
        let mut scheduled = 0;

        for config in configs {
            match self.scheduler.register(&config).await {
                Ok(()) => scheduled += 1,
                Err(e) => {
                    warn!("Config {} not scheduled: {}", config.id, e);
                    self.store
                        .apply_status(&config.id, &StatusUpdate::failed(e.to_string()))
                        .await?;
                }
            }
        }

        info!("Engine started with {} scheduled configs", scheduled);
        self.emit_event(EngineEvent::Started {
            configs_count: scheduled,
        });
        Ok(scheduled)
    }

    /// All configs with their current status
    pub async fn list_configs(&self) -> Result<Vec<DdnsConfig>> {
        self.store.list().await
    }

    pub async fn get_config(&self, id: &str) -> Result<DdnsConfig> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("config {}", id)))
    }

    /// Validate, store and schedule a new config
    ///
    /// # Returns
    ///
    /// - `Err(Error::Validation)`: bad request; nothing stored or scheduled
    /// - `Err(Error::Conflict)`: another config already manages the same
    ///   record id, or the same name and family in the zone
    pub async fn create_config(&self, request: NewDdnsConfig) -> Result<DdnsConfig> {
        request.validate()?;

        let config = request.into_config(uuid::Uuid::new_v4().to_string());
        self.ensure_name_free(&config, None).await?;
        self.store.insert(config.clone()).await?;

        if let Err(e) = self.scheduler.register(&config).await {
            self.store.remove(&config.id).await?;
            return Err(e);
        }

        info!(
            "Created config {} for {} ({})",
            config.id, config.record_name, config.address_family
        );
        Ok(config)
    }

    /// Change a config's settings
    ///
    /// Waits for any running cycle of this config, applies the patch, and
    /// restarts the timer if the interval changed.
    pub async fn update_config(&self, id: &str, patch: DdnsConfigPatch) -> Result<DdnsConfig> {
        patch.validate()?;
        let current = self.get_config(id).await?;
        if patch.is_empty() {
            return Ok(current);
        }

        if let Some(name) = &patch.record_name {
            let mut renamed = current.clone();
            renamed.record_name = name.clone();
            self.ensure_name_free(&renamed, Some(id)).await?;
        }

        let _cycle_guard = self.scheduler.lock(id).await.ok();
        let updated = self
            .store
            .update_settings(id, &patch)
            .await?
            .ok_or_else(|| Error::not_found(format!("config {}", id)))?;

        if updated.update_interval_seconds != current.update_interval_seconds
            && self.scheduler.is_registered(id).await
        {
            self.scheduler
                .reschedule(id, updated.update_interval_seconds)
                .await?;
        }

        debug!("Updated config {}", id);
        Ok(updated)
    }

    /// Stop the config's timer and remove it from the store
    ///
    /// A cycle already running completes but its result is not persisted.
    pub async fn delete_config(&self, id: &str) -> Result<DdnsConfig> {
        self.scheduler.deregister(id).await;
        let removed = self
            .store
            .remove(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("config {}", id)))?;
        info!("Deleted config {} ({})", id, removed.record_name);
        Ok(removed)
    }

    /// Run one cycle for `id` now
    pub async fn trigger_update(&self, id: &str) -> Result<CycleOutcome> {
        self.scheduler.trigger_now(id).await
    }

    /// Run one cycle for every scheduled config
    pub async fn trigger_update_all(&self) -> Vec<(String, Result<CycleOutcome>)> {
        self.scheduler.trigger_all().await
    }

    /// Resolve the current public IP without touching any config
    pub async fn resolve_ip(&self, family: AddressFamily) -> Result<IpAddr> {
        let ip = self.resolver.resolve(family).await?;
        if !family.matches(&ip) {
            return Err(Error::resolution(format!(
                "expected {} address, got {}",
                family, ip
            )));
        }
        Ok(ip)
    }

    pub async fn list_zones(&self) -> Result<Vec<Zone>> {
        self.provider.list_zones().await
    }

    /// Address records in a zone; an empty `types` lists A and AAAA
    pub async fn list_records(&self, zone_id: &str, types: &[RecordType]) -> Result<Vec<DnsRecord>> {
        let types = if types.is_empty() {
            &[RecordType::A, RecordType::Aaaa][..]
        } else {
            types
        };
        self.provider.list_records(zone_id, types).await
    }

    pub async fn create_record(&self, zone_id: &str, record: NewDnsRecord) -> Result<DnsRecord> {
        record.validate()?;
        self.provider.create_record(zone_id, &record).await
    }

    pub async fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        patch: DnsRecordPatch,
    ) -> Result<DnsRecord> {
        patch.validate()?;
        self.provider.update_record(zone_id, record_id, &patch).await
    }

    /// Delete a record; an already-absent record counts as deleted
    pub async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<()> {
        match self.provider.delete_record(zone_id, record_id).await {
            Err(e) if e.is_not_found() => {
                debug!("Record {} already absent", record_id);
                Ok(())
            }
            other => other,
        }
    }

    /// New receiver for engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Engine events as a stream; events missed by a lagging consumer are skipped
    pub fn events(&self) -> impl Stream<Item = EngineEvent> + Send + 'static {
        BroadcastStream::new(self.event_tx.subscribe()).filter_map(|event| event.ok())
    }

    /// Ids of configs with a running timer
    pub async fn scheduled_configs(&self) -> Vec<String> {
        self.scheduler.registered().await
    }

    /// Run the engine
    ///
    /// Starts every stored config and runs until Ctrl-C.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown
    /// - `Err(Error)`: Fatal error
    pub async fn run(&self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run until `shutdown_rx` fires (or Ctrl-C when `None`)
    pub async fn run_with_shutdown(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.run_internal(shutdown_rx).await
    }

    async fn run_internal(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.start().await?;

        let reason = match shutdown_rx {
            Some(rx) => {
                // A dropped sender counts as a shutdown request
                let _ = rx.await;
                "Shutdown signal"
            }
            None => {
                tokio::signal::ctrl_c().await?;
                "Ctrl-C"
            }
        };

        info!("Shutdown signal received");
        self.shutdown_with_reason(reason).await
    }

    /// Stop every timer and flush the store
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_reason("Shutdown requested").await
    }

    async fn shutdown_with_reason(&self, reason: &str) -> Result<()> {
        self.scheduler.shutdown().await;
        self.emit_event(EngineEvent::Stopped {
            reason: reason.to_string(),
        });

        self.store.flush().await?;
        info!("Config store flushed, engine stopped");
        Ok(())
    }

    /// Refuse a second config for the same zone, name and family
    async fn ensure_name_free(&self, candidate: &DdnsConfig, except: Option<&str>) -> Result<()> {
        let existing = self.store.list().await?;
        if let Some(other) = existing.iter().find(|c| {
            Some(c.id.as_str()) != except
                && c.zone_id == candidate.zone_id
                && c.address_family == candidate.address_family
                && c.targets_name(&candidate.record_name)
        }) {
            return Err(Error::conflict(format!(
                "config {} already manages {} ({})",
                other.id, other.record_name, other.address_family
            )));
        }
        Ok(())
    }

    fn emit_event(&self, event: EngineEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("No event subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_event_clone_eq() {
        let event = EngineEvent::RecordUpdated {
            config_id: "a".to_string(),
            record_id: "rec".to_string(),
            previous: "1.1.1.1".to_string(),
            ip: IpAddr::from([1, 2, 3, 4]),
        };
        assert_eq!(event.clone(), event);
    }
}
