//! Single compare-and-update cycle for one config
//!
//! ## Cycle
//!
//! ```text
//! checking ──resolve IP──► locate record ──equal──────────────► ok
//!    │                        │    │
//!    │                        │    └─differ─► updating ─write─► ok | error
//!    │                        └─missing─► updating ─create────► ok | error
//!    └─resolution failed──────────────────────────────────────► error
//! ```
//!
//! Failures inside a cycle are recorded on the config (`status = error`,
//! `last_error`) and never retried inline; the next tick is the retry.
//! Only config store failures surface as `Err`.
//!
//! Every write goes through [`ConfigStore::apply_status`], which refuses to
//! touch a config that was deleted while the cycle was in flight.

use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::engine::EngineEvent;
use crate::error::{Error, Result};
use crate::model::{
    ConfigStatus, DdnsConfig, DnsRecord, DnsRecordPatch, MANAGED_RECORD_COMMENT, NewDnsRecord,
    StatusUpdate,
};
use crate::traits::{ConfigStore, DnsProvider, IpResolver};

/// How a cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Record already held the resolved IP; no write
    Unchanged,
    /// Record content was rewritten
    Updated,
    /// Record did not exist and was created
    Created,
    /// Cycle failed; the reason is in `last_error`
    Failed,
    /// Config was deleted before or during the cycle; nothing persisted
    Discarded,
}

/// Result of the provider-facing part of a cycle
struct Step {
    update: StatusUpdate,
    outcome: CycleOutcome,
    event: Option<EngineEvent>,
}

impl Step {
    fn failed(config: &DdnsConfig, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            event: Some(EngineEvent::CycleFailed {
                config_id: config.id.clone(),
                error: message.clone(),
            }),
            update: StatusUpdate::failed(message),
            outcome: CycleOutcome::Failed,
        }
    }
}

/// Runs reconciliation cycles
///
/// Holds no per-config state; the scheduler guarantees a config never has
/// two cycles in flight.
pub struct Reconciler {
    store: Arc<dyn ConfigStore>,
    provider: Arc<dyn DnsProvider>,
    resolver: Arc<dyn IpResolver>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<EngineEvent>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        provider: Arc<dyn DnsProvider>,
        resolver: Arc<dyn IpResolver>,
        clock: Arc<dyn Clock>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            store,
            provider,
            resolver,
            clock,
            events,
        }
    }

    /// Run one cycle for config `id`
    ///
    /// # Returns
    ///
    /// - `Ok(CycleOutcome)`: the cycle ran (or was discarded)
    /// - `Err(Error)`: the config store failed
    pub async fn reconcile(&self, id: &str) -> Result<CycleOutcome> {
        let checking = StatusUpdate::new(ConfigStatus::Checking);
        let Some(config) = self.store.apply_status(id, &checking).await? else {
            debug!("Config {} no longer exists, skipping cycle", id);
            return Ok(CycleOutcome::Discarded);
        };

        self.emit(EngineEvent::CycleStarted {
            config_id: config.id.clone(),
        });

        let step = match self.run_cycle(&config).await? {
            Some(step) => step,
            None => return Ok(self.discarded(&config.id)),
        };

        let persisted = match self.store.apply_status(&config.id, &step.update).await {
            Ok(persisted) => persisted,
            Err(Error::Conflict(message)) => {
                // Another config claimed the record between the check and the write
                warn!("Config {}: {}", config.id, message);
                let fallback = Step::failed(&config, message);
                return match self.store.apply_status(&config.id, &fallback.update).await? {
                    Some(_) => {
                        if let Some(event) = fallback.event {
                            self.emit(event);
                        }
                        Ok(CycleOutcome::Failed)
                    }
                    None => Ok(self.discarded(&config.id)),
                };
            }
            Err(e) => return Err(e),
        };

        if persisted.is_none() {
            return Ok(self.discarded(&config.id));
        }

        if let Some(event) = step.event {
            self.emit(event);
        }
        Ok(step.outcome)
    }

    /// Resolve, locate, compare and write
    ///
    /// `Ok(None)` means the config disappeared mid-cycle.
    async fn run_cycle(&self, config: &DdnsConfig) -> Result<Option<Step>> {
        let family = config.address_family;

        let ip = match self.resolver.resolve(family).await {
            Ok(ip) if family.matches(&ip) => ip,
            Ok(ip) => {
                warn!(
                    "Resolver {} returned {} for {} config {}",
                    self.resolver.resolver_name(),
                    ip,
                    family,
                    config.id
                );
                return Ok(Some(Step::failed(
                    config,
                    format!("ip resolution failed: expected {} address, got {}", family, ip),
                )));
            }
            Err(e) => {
                warn!("IP resolution failed for config {}: {}", config.id, e);
                return Ok(Some(Step::failed(config, resolution_message(&e))));
            }
        };

        let (record, adopted) = match &config.record_id {
            Some(record_id) => match self.provider.get_record(&config.zone_id, record_id).await {
                Ok(record) => (record, false),
                Err(e) if e.is_not_found() => return Ok(Some(self.record_gone(config, record_id))),
                Err(e) => return Ok(Some(self.provider_failed(config, "read", e))),
            },
            None => match self.locate_by_name(config).await {
                Ok(Some(record)) => (record, true),
                Ok(None) => return self.create(config, ip).await,
                Err(e) => return Ok(Some(self.provider_failed(config, "lookup", e))),
            },
        };

        if record.record_type != config.record_type() {
            return Ok(Some(Step::failed(
                config,
                format!(
                    "record {} is {}, expected {}",
                    record.id,
                    record.record_type,
                    config.record_type()
                ),
            )));
        }

        if adopted
            && let Some(owner) = self.store.find_by_record_id(&record.id).await?
            && owner.id != config.id
        {
            return Ok(Some(Step::failed(
                config,
                format!("record {} is already managed by config {}", record.id, owner.id),
            )));
        }

        if record.ip() == Some(ip) {
            debug!(
                "Record {} already points at {}, no update needed",
                record.name, ip
            );
            let mut update = StatusUpdate::ok().current_ip(ip.to_string());
            if adopted {
                update = update.record_id(record.id.clone());
            }
            return Ok(Some(Step {
                update,
                outcome: CycleOutcome::Unchanged,
                event: Some(EngineEvent::RecordUnchanged {
                    config_id: config.id.clone(),
                    ip,
                }),
            }));
        }

        self.update(config, record, adopted, ip).await
    }

    async fn locate_by_name(&self, config: &DdnsConfig) -> Result<Option<DnsRecord>> {
        let records = self
            .provider
            .list_records(&config.zone_id, &[config.record_type()])
            .await?;

        let mut matching = records
            .into_iter()
            .filter(|r| r.record_type == config.record_type() && config.targets_name(&r.name));
        let found = matching.next();
        if found.is_some() && matching.next().is_some() {
            warn!(
                "Several {} records named {} exist, adopting the first",
                config.record_type(),
                config.record_name
            );
        }
        if let Some(record) = &found {
            info!(
                "Adopting existing record {} ({}) for config {}",
                record.name, record.id, config.id
            );
        }
        Ok(found)
    }

    async fn create(&self, config: &DdnsConfig, ip: IpAddr) -> Result<Option<Step>> {
        if self.mark_updating(config).await?.is_none() {
            return Ok(None);
        }

        let new_record = NewDnsRecord {
            record_type: config.record_type(),
            name: config.record_name.clone(),
            content: ip.to_string(),
            ttl: config.ttl,
            proxied: config.proxied,
            comment: Some(MANAGED_RECORD_COMMENT.to_string()),
        };

        match self.provider.create_record(&config.zone_id, &new_record).await {
            Ok(record) => {
                info!(
                    "Created {} record {} -> {} (id {})",
                    record.record_type, record.name, ip, record.id
                );
                Ok(Some(Step {
                    update: StatusUpdate::ok()
                        .record_id(record.id.clone())
                        .current_ip(ip.to_string())
                        .updated_at(self.clock.now()),
                    outcome: CycleOutcome::Created,
                    event: Some(EngineEvent::RecordCreated {
                        config_id: config.id.clone(),
                        record_id: record.id,
                        ip,
                    }),
                }))
            }
            Err(e) => Ok(Some(self.provider_failed(config, "create", e))),
        }
    }

    async fn update(
        &self,
        config: &DdnsConfig,
        record: DnsRecord,
        adopted: bool,
        ip: IpAddr,
    ) -> Result<Option<Step>> {
        if self.mark_updating(config).await?.is_none() {
            return Ok(None);
        }

        let patch = DnsRecordPatch::content(ip);
        match self
            .provider
            .update_record(&config.zone_id, &record.id, &patch)
            .await
        {
            Ok(updated) => {
                info!(
                    "Updated {} {} -> {} (was {})",
                    updated.record_type, updated.name, ip, record.content
                );
                Ok(Some(Step {
                    update: StatusUpdate::ok()
                        .record_id(record.id.clone())
                        .current_ip(ip.to_string())
                        .updated_at(self.clock.now()),
                    outcome: CycleOutcome::Updated,
                    event: Some(EngineEvent::RecordUpdated {
                        config_id: config.id.clone(),
                        record_id: record.id,
                        previous: record.content,
                        ip,
                    }),
                }))
            }
            Err(e) if e.is_not_found() => Ok(Some(self.record_gone(config, &record.id))),
            Err(e) => {
                let mut step = self.provider_failed(config, "update", e);
                if adopted {
                    step.update = step.update.record_id(record.id);
                }
                Ok(Some(step))
            }
        }
    }

    async fn mark_updating(&self, config: &DdnsConfig) -> Result<Option<DdnsConfig>> {
        self.store
            .apply_status(&config.id, &StatusUpdate::new(ConfigStatus::Updating))
            .await
    }

    /// Record vanished out-of-band: drop the id so the next cycle re-adopts or re-creates
    fn record_gone(&self, config: &DdnsConfig, record_id: &str) -> Step {
        warn!(
            "Record {} for config {} no longer exists, it will be re-created next cycle",
            record_id, config.id
        );
        let mut step = Step::failed(
            config,
            format!("record {} no longer exists at the provider", record_id),
        );
        step.update = step.update.clear_record_id();
        step
    }

    /// Transient failures are retried by the next tick; anything else needs
    /// the operator (bad token, rejected request) and is logged as an error
    fn provider_failed(&self, config: &DdnsConfig, action: &str, e: Error) -> Step {
        let provider = self.provider.provider_name();
        if e.is_transient() {
            warn!(
                "Provider {} {} failed for config {}: {}",
                provider, action, config.id, e
            );
            Step::failed(
                config,
                format!("record {} failed: {} (retrying next cycle)", action, e),
            )
        } else {
            error!(
                "Provider {} {} failed for config {}: {}",
                provider, action, config.id, e
            );
            Step::failed(config, format!("record {} failed: {}", action, e))
        }
    }

    fn discarded(&self, id: &str) -> CycleOutcome {
        debug!("Config {} was deleted during its cycle, result discarded", id);
        self.emit(EngineEvent::CycleDiscarded {
            config_id: id.to_string(),
        });
        CycleOutcome::Discarded
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn resolution_message(e: &Error) -> String {
    match e {
        Error::Resolution(msg) => format!("ip resolution failed: {}", msg),
        other => format!("ip resolution failed: {}", other),
    }
}
