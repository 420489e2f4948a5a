//! Per-config timers
//!
//! Each registered config owns one tokio task that ticks every
//! `update_interval_seconds` and runs a reconciliation cycle. Timers are
//! independent: a slow or failing config never delays another.
//!
//! ## Serialisation
//!
//! Every config has a single-flight guard (`Arc<Mutex<()>>`). Timer ticks,
//! [`Scheduler::trigger_now`], [`Scheduler::trigger_all`] and settings
//! updates all take it, so cycles for one config are totally ordered and
//! never overlap. A global semaphore bounds how many cycles run at once
//! across all configs.
//!
//! ## Cancellation
//!
//! Each timer has a child of the scheduler's shutdown token. Deregistering
//! cancels it: no new tick starts, and a cycle already running finishes
//! (its store write is discarded by the reconciler if the config is gone).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore, broadcast};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::engine::EngineEvent;
use crate::error::{Error, Result};
use crate::model::{DdnsConfig, validate_interval};
use crate::reconciler::{CycleOutcome, Reconciler};

type CycleGuard = Arc<Mutex<()>>;

struct Entry {
    interval: Duration,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    guard: CycleGuard,
}

/// Owns one recurring timer per registered config
pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    entries: Mutex<HashMap<String, Entry>>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    events: broadcast::Sender<EngineEvent>,
    reconcile_on_register: bool,
    shutdown_timeout: Duration,
}

impl Scheduler {
    pub fn new(
        reconciler: Arc<Reconciler>,
        config: &EngineConfig,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            reconciler,
            entries: Mutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(config.max_concurrent_cycles)),
            shutdown: CancellationToken::new(),
            events,
            reconcile_on_register: config.reconcile_on_register,
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
        }
    }

    /// Start the timer for `config`
    ///
    /// The first tick fires one interval from now, or immediately when
    /// `reconcile_on_register` is set. Registering an id that already has a
    /// timer replaces the timer.
    pub async fn register(&self, config: &DdnsConfig) -> Result<()> {
        validate_interval(config.update_interval_seconds)?;
        if self.shutdown.is_cancelled() {
            return Err(Error::Other("scheduler is shut down".to_string()));
        }

        let interval = Duration::from_secs(config.update_interval_seconds);
        let mut entries = self.entries.lock().await;
        let guard = match entries.remove(&config.id) {
            Some(previous) => {
                previous.cancel.cancel();
                previous.guard
            }
            None => Arc::new(Mutex::new(())),
        };

        let entry = self.spawn_timer(&config.id, interval, guard, self.reconcile_on_register);
        entries.insert(config.id.clone(), entry);
        drop(entries);

        info!(
            "Registered config {} ({} every {}s)",
            config.id, config.record_name, config.update_interval_seconds
        );
        self.emit(EngineEvent::ConfigRegistered {
            config_id: config.id.clone(),
            interval_secs: config.update_interval_seconds,
        });
        Ok(())
    }

    /// Stop the timer for `id`
    ///
    /// Returns `false` if nothing was registered. A cycle already running
    /// is left to finish.
    pub async fn deregister(&self, id: &str) -> bool {
        let removed = self.entries.lock().await.remove(id);
        match removed {
            Some(entry) => {
                entry.cancel.cancel();
                info!("Deregistered config {}", id);
                self.emit(EngineEvent::ConfigDeregistered {
                    config_id: id.to_string(),
                });
                true
            }
            None => false,
        }
    }

    /// Replace the timer for `id` with one firing every `interval_secs`
    ///
    /// The next tick is one new interval from now. The single-flight guard
    /// is kept, so a running cycle still excludes the new timer.
    pub async fn reschedule(&self, id: &str, interval_secs: u64) -> Result<()> {
        validate_interval(interval_secs)?;
        let interval = Duration::from_secs(interval_secs);

        let mut entries = self.entries.lock().await;
        let Some(previous) = entries.remove(id) else {
            return Err(Error::not_found(format!("config {} is not scheduled", id)));
        };
        if previous.interval == interval {
            entries.insert(id.to_string(), previous);
            return Ok(());
        }
        previous.cancel.cancel();
        let entry = self.spawn_timer(id, interval, previous.guard, false);
        entries.insert(id.to_string(), entry);

        debug!("Rescheduled config {} to every {}s", id, interval_secs);
        Ok(())
    }

    /// Run one cycle for `id` now, outside the timer
    ///
    /// Waits for any cycle already running for `id`. The timer's next fire
    /// time is unaffected.
    pub async fn trigger_now(&self, id: &str) -> Result<CycleOutcome> {
        let guard = self.guard_of(id).await?;
        match run_guarded(&self.reconciler, id, &guard, &self.permits, &self.shutdown).await {
            Some(result) => result,
            None => Err(Error::Other("scheduler is shut down".to_string())),
        }
    }

    /// Run one cycle for every registered config, concurrently
    ///
    /// Each cycle is independent; one failing does not stop the others.
    /// Results are returned in no particular order.
    pub async fn trigger_all(&self) -> Vec<(String, Result<CycleOutcome>)> {
        let targets: Vec<(String, CycleGuard)> = self
            .entries
            .lock()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), entry.guard.clone()))
            .collect();

        let mut set = JoinSet::new();
        for (id, guard) in targets {
            let reconciler = self.reconciler.clone();
            let permits = self.permits.clone();
            let shutdown = self.shutdown.clone();
            set.spawn(async move {
                let result = run_guarded(&reconciler, &id, &guard, &permits, &shutdown)
                    .await
                    .unwrap_or_else(|| Err(Error::Other("scheduler is shut down".to_string())));
                (id, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!("Reconciliation task failed to complete: {}", e),
            }
        }
        results
    }

    /// Exclude cycles for `id` while the returned guard is held
    pub async fn lock(&self, id: &str) -> Result<OwnedMutexGuard<()>> {
        let guard = self.guard_of(id).await?;
        Ok(guard.lock_owned().await)
    }

    pub async fn is_registered(&self, id: &str) -> bool {
        self.entries.lock().await.contains_key(id)
    }

    /// Current interval for `id`
    pub async fn interval_of(&self, id: &str) -> Option<Duration> {
        self.entries.lock().await.get(id).map(|e| e.interval)
    }

    /// Ids with a running timer
    pub async fn registered(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Cancel every timer and wait for running cycles to finish
    ///
    /// Timers still busy after `shutdown_timeout_secs` are aborted.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let entries: Vec<(String, Entry)> = self.entries.lock().await.drain().collect();
        if entries.is_empty() {
            return;
        }

        debug!("Stopping {} timers", entries.len());
        let deadline = instant_after(self.shutdown_timeout);
        for (id, entry) in entries {
            let mut handle = entry.handle;
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Timer for config {} ended abnormally: {}", id, e),
                Err(_) => {
                    warn!("Timer for config {} did not stop in time, aborting", id);
                    handle.abort();
                }
            }
        }
    }

    async fn guard_of(&self, id: &str) -> Result<CycleGuard> {
        self.entries
            .lock()
            .await
            .get(id)
            .map(|e| e.guard.clone())
            .ok_or_else(|| Error::not_found(format!("config {} is not scheduled", id)))
    }

    fn spawn_timer(
        &self,
        id: &str,
        interval: Duration,
        guard: CycleGuard,
        fire_immediately: bool,
    ) -> Entry {
        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(run_timer(
            self.reconciler.clone(),
            id.to_string(),
            interval,
            guard.clone(),
            self.permits.clone(),
            cancel.clone(),
            fire_immediately,
        ));
        Entry {
            interval,
            cancel,
            handle,
            guard,
        }
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}

/// `now + delay`, saturating at roughly thirty years out
fn instant_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

async fn run_timer(
    reconciler: Arc<Reconciler>,
    id: String,
    period: Duration,
    guard: CycleGuard,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    fire_immediately: bool,
) {
    let start = if fire_immediately {
        Instant::now()
    } else {
        instant_after(period)
    };
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match run_guarded(&reconciler, &id, &guard, &permits, &cancel).await {
            Some(Ok(outcome)) => debug!("Config {} cycle finished: {:?}", id, outcome),
            Some(Err(e)) => error!("Config {} cycle could not be recorded: {}", id, e),
            None => break,
        }
    }

    debug!("Timer for config {} stopped", id);
}

/// Take the config's guard and a global permit, then run one cycle
///
/// Returns `None` if `cancel` fires before the cycle starts. Once started,
/// a cycle always runs to completion.
async fn run_guarded(
    reconciler: &Reconciler,
    id: &str,
    guard: &Mutex<()>,
    permits: &Semaphore,
    cancel: &CancellationToken,
) -> Option<Result<CycleOutcome>> {
    let acquire = async {
        let exclusive = guard.lock().await;
        let permit = permits.acquire().await;
        (exclusive, permit)
    };

    let (_exclusive, permit) = tokio::select! {
        biased;
        _ = cancel.cancelled() => return None,
        acquired = acquire => acquired,
    };
    let Ok(_permit) = permit else {
        return None;
    };

    Some(reconciler.reconcile(id).await)
}
