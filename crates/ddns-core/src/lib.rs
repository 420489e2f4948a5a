// # ddns-core
//
// Reconciliation and scheduling engine for dynamic DNS.
//
// ## Architecture Overview
//
// For every DDNS config the engine periodically resolves the host's public
// IP, compares it with the provider's record, writes only on drift, and
// records the outcome:
// - **IpResolver**: Trait for discovering the current public IP
// - **DnsProvider**: Trait for reading and writing provider records
// - **ConfigStore**: Trait for durable desired state and status
// - **Reconciler**: One compare-and-update cycle for one config
// - **Scheduler**: One independent timer per config, single-flight per config
// - **DdnsEngine**: Facade exposing config, trigger and passthrough operations
// - **ProviderRegistry**: Plugin-based registry for providers and resolvers
//
// ## Design Principles
//
// 1. **Compare before write**: the steady state costs one read, not one write
// 2. **Store as single source of truth**: no shared mutable config copies
// 3. **Failures stay local**: one config's error never stops another's timer
// 4. **Library-First**: the daemon is a thin shell around this crate

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod reconciler;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DdnsSettings, EngineConfig, ProviderConfig, ResolverConfig, StoreConfig};
pub use engine::{DdnsEngine, EngineEvent};
pub use error::{Error, Result};
pub use model::{
    AddressFamily, ConfigStatus, DdnsConfig, DdnsConfigPatch, DnsRecord, DnsRecordPatch,
    NewDdnsConfig, NewDnsRecord, RecordType, StatusUpdate, Zone,
};
pub use reconciler::{CycleOutcome, Reconciler};
pub use registry::ProviderRegistry;
pub use scheduler::Scheduler;
pub use state::{FileConfigStore, MemoryConfigStore, open_store};
pub use traits::{ConfigStore, DnsProvider, IpResolver};
