//! Test doubles and common utilities for contract tests
//!
//! - [`ScriptedResolver`]: returns whatever address (or failure) the test set
//! - [`FakeProvider`]: in-memory zone with call counters, fault injection,
//!   and a read gate for holding a cycle in flight
//! - [`CountingStore`]: memory store that counts flushes
//!
//! All doubles are `Clone`; clones share state, so a test keeps one handle
//! and gives another to the engine.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ddns_core::error::{Error, Result};
use ddns_core::model::{
    AddressFamily, DdnsConfig, DdnsConfigPatch, DnsRecord, DnsRecordPatch, NewDdnsConfig,
    NewDnsRecord, RecordType, StatusUpdate, Zone,
};
use ddns_core::traits::{ConfigStore, DnsProvider, IpResolver};
use ddns_core::{DdnsEngine, EngineConfig, EngineEvent, ManualClock, MemoryConfigStore};
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Semaphore, broadcast};

pub const ZONE: &str = "zone-1";

pub fn ip(s: &str) -> IpAddr {
    s.parse().expect("valid ip literal")
}

/// Fixed start time for the manual clock
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 9, 12, 0, 0).unwrap()
}

/// Let spawned tasks run without moving the clock
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// Advance paused time and let woken timers finish their cycles
pub async fn advance_secs(secs: u64) {
    tokio::time::advance(std::time::Duration::from_secs(secs)).await;
    settle().await;
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct ScriptedResolver {
    answers: Arc<Mutex<HashMap<AddressFamily, std::result::Result<IpAddr, String>>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answering(ip: IpAddr) -> Self {
        let resolver = Self::new();
        let family = if ip.is_ipv4() {
            AddressFamily::Ipv4
        } else {
            AddressFamily::Ipv6
        };
        resolver.set(family, ip);
        resolver
    }

    pub fn set(&self, family: AddressFamily, ip: IpAddr) {
        self.answers.lock().unwrap().insert(family, Ok(ip));
    }

    pub fn fail(&self, family: AddressFamily, message: &str) {
        self.answers
            .lock()
            .unwrap()
            .insert(family, Err(message.to_string()));
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IpResolver for ScriptedResolver {
    async fn resolve(&self, family: AddressFamily) -> Result<IpAddr> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.answers.lock().unwrap().get(&family) {
            Some(Ok(ip)) => Ok(*ip),
            Some(Err(message)) => Err(Error::resolution(message.clone())),
            None => Err(Error::resolution(format!("no {} answer scripted", family))),
        }
    }

    fn resolver_name(&self) -> &'static str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Injected provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    NotFound,
    Provider,
    Auth,
    /// Record is deleted out-of-band, then the call reports NotFound
    Vanish,
}

impl Fault {
    fn to_error(self, what: &str) -> Error {
        match self {
            Fault::NotFound | Fault::Vanish => Error::not_found(what.to_string()),
            Fault::Provider => Error::provider("fake", format!("injected failure on {}", what)),
            Fault::Auth => Error::auth("injected credential rejection"),
        }
    }
}

#[derive(Default)]
struct FakeState {
    records: BTreeMap<String, DnsRecord>,
    next_id: u64,
    get_faults: HashMap<String, Fault>,
    update_faults: HashMap<String, Fault>,
    list_fault: Option<Fault>,
    updates: Vec<(String, String)>,
    created: Vec<NewDnsRecord>,
}

#[derive(Clone)]
pub struct FakeProvider {
    state: Arc<Mutex<FakeState>>,
    list_calls: Arc<AtomicUsize>,
    get_calls: Arc<AtomicUsize>,
    create_calls: Arc<AtomicUsize>,
    update_calls: Arc<AtomicUsize>,
    delete_calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    reads_entered: Arc<AtomicUsize>,
    gate: Arc<Mutex<Option<Arc<Semaphore>>>>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            list_calls: Arc::new(AtomicUsize::new(0)),
            get_calls: Arc::new(AtomicUsize::new(0)),
            create_calls: Arc::new(AtomicUsize::new(0)),
            update_calls: Arc::new(AtomicUsize::new(0)),
            delete_calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            reads_entered: Arc::new(AtomicUsize::new(0)),
            gate: Arc::new(Mutex::new(None)),
        }
    }

    /// Seed a record and return its id
    pub fn seed(&self, name: &str, record_type: RecordType, content: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("rec-{}", state.next_id);
        state.records.insert(
            id.clone(),
            DnsRecord {
                id: id.clone(),
                zone_id: ZONE.to_string(),
                record_type,
                name: name.to_string(),
                content: content.to_string(),
                ttl: 300,
                proxied: false,
                comment: None,
            },
        );
        id
    }

    pub fn record(&self, id: &str) -> Option<DnsRecord> {
        self.state.lock().unwrap().records.get(id).cloned()
    }

    pub fn records(&self) -> Vec<DnsRecord> {
        self.state.lock().unwrap().records.values().cloned().collect()
    }

    /// Delete a record behind the engine's back
    pub fn remove_out_of_band(&self, id: &str) {
        self.state.lock().unwrap().records.remove(id);
    }

    pub fn fail_get(&self, record_id: &str, fault: Fault) {
        self.state
            .lock()
            .unwrap()
            .get_faults
            .insert(record_id.to_string(), fault);
    }

    pub fn fail_update(&self, record_id: &str, fault: Fault) {
        self.state
            .lock()
            .unwrap()
            .update_faults
            .insert(record_id.to_string(), fault);
    }

    pub fn fail_list(&self, fault: Fault) {
        self.state.lock().unwrap().list_fault = Some(fault);
    }

    pub fn clear_faults(&self) {
        let mut state = self.state.lock().unwrap();
        state.get_faults.clear();
        state.update_faults.clear();
        state.list_fault = None;
    }

    /// (record id, new content) for every successful update, in order
    pub fn updates(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().updates.clone()
    }

    pub fn created(&self) -> Vec<NewDnsRecord> {
        self.state.lock().unwrap().created.clone()
    }

    /// Block reads (`get_record`, `list_records`) until released
    pub fn hold_reads(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `n` held reads through
    pub fn release_reads(&self, n: usize) {
        if let Some(gate) = self.gate.lock().unwrap().as_ref() {
            gate.add_permits(n);
        }
    }

    /// Stop gating reads
    pub fn open_reads(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn reads_entered(&self) -> usize {
        self.reads_entered.load(Ordering::SeqCst)
    }

    pub fn list_call_count(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_call_count(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn create_call_count(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn update_call_count(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn delete_call_count(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Calls of any kind
    pub fn total_calls(&self) -> usize {
        self.list_call_count()
            + self.get_call_count()
            + self.create_call_count()
            + self.update_call_count()
            + self.delete_call_count()
    }

    /// Most provider calls observed in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter_read(&self) -> InFlight {
        self.reads_entered.fetch_add(1, Ordering::SeqCst);
        let guard = self.enter();
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate open").forget();
        }
        guard
    }

    fn enter(&self) -> InFlight {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(self.in_flight.clone())
    }
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DnsProvider for FakeProvider {
    async fn list_zones(&self) -> Result<Vec<Zone>> {
        Ok(vec![Zone {
            id: ZONE.to_string(),
            name: "example.com".to_string(),
            status: Some("active".to_string()),
        }])
    }

    async fn list_records(&self, zone_id: &str, types: &[RecordType]) -> Result<Vec<DnsRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = self.enter_read().await;
        let state = self.state.lock().unwrap();
        if let Some(fault) = state.list_fault {
            return Err(fault.to_error("list"));
        }
        Ok(state
            .records
            .values()
            .filter(|r| r.zone_id == zone_id)
            .filter(|r| types.is_empty() || types.contains(&r.record_type))
            .cloned()
            .collect())
    }

    async fn get_record(&self, zone_id: &str, record_id: &str) -> Result<DnsRecord> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = self.enter_read().await;
        let mut state = self.state.lock().unwrap();
        if let Some(fault) = state.get_faults.get(record_id).copied() {
            if fault == Fault::Vanish {
                state.records.remove(record_id);
            }
            return Err(fault.to_error(record_id));
        }
        state
            .records
            .get(record_id)
            .filter(|r| r.zone_id == zone_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("record {}", record_id)))
    }

    async fn create_record(&self, zone_id: &str, record: &NewDnsRecord) -> Result<DnsRecord> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = self.enter();
        record.validate()?;
        let mut state = self.state.lock().unwrap();
        let duplicate = state.records.values().any(|r| {
            r.zone_id == zone_id
                && r.record_type == record.record_type
                && r.name.eq_ignore_ascii_case(&record.name)
        });
        if duplicate {
            return Err(Error::conflict(format!("{} already exists", record.name)));
        }
        state.next_id += 1;
        let id = format!("rec-{}", state.next_id);
        let created = DnsRecord {
            id: id.clone(),
            zone_id: zone_id.to_string(),
            record_type: record.record_type,
            name: record.name.clone(),
            content: record.content.clone(),
            ttl: record.ttl,
            proxied: record.proxied,
            comment: record.comment.clone(),
        };
        state.records.insert(id, created.clone());
        state.created.push(record.clone());
        Ok(created)
    }

    async fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        patch: &DnsRecordPatch,
    ) -> Result<DnsRecord> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = self.enter();
        let mut state = self.state.lock().unwrap();
        if let Some(fault) = state.update_faults.get(record_id).copied() {
            if fault == Fault::Vanish {
                state.records.remove(record_id);
            }
            return Err(fault.to_error(record_id));
        }
        let record = state
            .records
            .get_mut(record_id)
            .filter(|r| r.zone_id == zone_id)
            .ok_or_else(|| Error::not_found(format!("record {}", record_id)))?;
        if let Some(content) = &patch.content {
            record.content = content.clone();
        }
        if let Some(name) = &patch.name {
            record.name = name.clone();
        }
        if let Some(ttl) = patch.ttl {
            record.ttl = ttl;
        }
        if let Some(proxied) = patch.proxied {
            record.proxied = proxied;
        }
        if let Some(comment) = &patch.comment {
            record.comment = Some(comment.clone());
        }
        let updated = record.clone();
        state
            .updates
            .push((record_id.to_string(), updated.content.clone()));
        Ok(updated)
    }

    async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        match state.records.get(record_id) {
            Some(r) if r.zone_id == zone_id => {
                state.records.remove(record_id);
                Ok(())
            }
            _ => Err(Error::not_found(format!("record {}", record_id))),
        }
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Memory store that counts flushes
#[derive(Clone, Default)]
pub struct CountingStore {
    inner: MemoryConfigStore,
    flush_calls: Arc<AtomicUsize>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flush_call_count(&self) -> usize {
        self.flush_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigStore for CountingStore {
    async fn get(&self, id: &str) -> Result<Option<DdnsConfig>> {
        self.inner.get(id).await
    }

    async fn list(&self) -> Result<Vec<DdnsConfig>> {
        self.inner.list().await
    }

    async fn insert(&self, config: DdnsConfig) -> Result<()> {
        self.inner.insert(config).await
    }

    async fn apply_status(&self, id: &str, update: &StatusUpdate) -> Result<Option<DdnsConfig>> {
        self.inner.apply_status(id, update).await
    }

    async fn update_settings(
        &self,
        id: &str,
        patch: &DdnsConfigPatch,
    ) -> Result<Option<DdnsConfig>> {
        self.inner.update_settings(id, patch).await
    }

    async fn remove(&self, id: &str) -> Result<Option<DdnsConfig>> {
        self.inner.remove(id).await
    }

    async fn find_by_record_id(&self, record_id: &str) -> Result<Option<DdnsConfig>> {
        self.inner.find_by_record_id(record_id).await
    }

    async fn flush(&self) -> Result<()> {
        self.flush_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.flush().await
    }
}

// ---------------------------------------------------------------------------
// Engine harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub engine: Arc<DdnsEngine>,
    pub events: broadcast::Receiver<EngineEvent>,
    pub provider: FakeProvider,
    pub resolver: ScriptedResolver,
    pub store: CountingStore,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(provider: FakeProvider, resolver: ScriptedResolver) -> Self {
        Self::with_engine_config(provider, resolver, EngineConfig::default())
    }

    pub fn with_engine_config(
        provider: FakeProvider,
        resolver: ScriptedResolver,
        config: EngineConfig,
    ) -> Self {
        let store = CountingStore::new();
        let clock = Arc::new(ManualClock::new(epoch()));
        let (engine, events) = DdnsEngine::with_clock(
            Arc::new(store.clone()),
            Arc::new(provider.clone()),
            Arc::new(resolver.clone()),
            config,
            clock.clone(),
        )
        .expect("engine construction succeeds");

        Self {
            engine: Arc::new(engine),
            events,
            provider,
            resolver,
            store,
            clock,
        }
    }

    /// Drain events received so far
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

/// IPv4 config for `name` in [`ZONE`], checked every 300s
pub fn v4_config(name: &str) -> NewDdnsConfig {
    NewDdnsConfig::new(ZONE, name, AddressFamily::Ipv4, 300)
}

/// IPv6 config for `name` in [`ZONE`], checked every 300s
pub fn v6_config(name: &str) -> NewDdnsConfig {
    NewDdnsConfig::new(ZONE, name, AddressFamily::Ipv6, 300)
}
