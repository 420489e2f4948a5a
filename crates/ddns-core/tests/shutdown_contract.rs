//! Architectural Contract Test: Shutdown Determinism
//!
//! This test verifies that the engine stops cleanly.
//!
//! Constraints verified:
//! - `run_with_shutdown` returns once the signal fires
//! - No cycle starts after shutdown
//! - A cycle already running is allowed to finish
//! - A cycle stuck past the shutdown timeout is abandoned
//! - The config store is flushed exactly once on shutdown
//!
//! If this test fails, the daemon may hang on SIGTERM or lose state.

mod common;

use common::*;
use ddns_core::model::{ConfigStatus, RecordType};
use ddns_core::{DdnsEngine, EngineConfig, EngineEvent, FileConfigStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

#[tokio::test]
async fn run_with_shutdown_returns_after_signal() {
    let mut h = Harness::new(
        FakeProvider::new(),
        ScriptedResolver::answering(ip("1.2.3.4")),
    );
    h.engine
        .create_config(v4_config("home.example.com"))
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let engine = h.engine.clone();
    let running = tokio::spawn(async move { engine.run_with_shutdown(Some(shutdown_rx)).await });
    settle().await;

    shutdown_tx.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("Engine did not stop within 5s");
    assert!(result.unwrap().is_ok());

    assert_eq!(h.store.flush_call_count(), 1);
    assert!(h.engine.scheduled_configs().await.is_empty());

    let events = h.drain_events();
    assert!(events.contains(&EngineEvent::Started { configs_count: 1 }));
    assert!(
        matches!(events.last(), Some(EngineEvent::Stopped { .. })),
        "Stopped must be the last event, got {:?}",
        events
    );
}

#[tokio::test(start_paused = true)]
async fn no_cycle_starts_after_shutdown() {
    let h = Harness::new(
        FakeProvider::new(),
        ScriptedResolver::answering(ip("1.2.3.4")),
    );
    h.engine
        .create_config(v4_config("home.example.com"))
        .await
        .unwrap();
    settle().await;

    h.engine.shutdown().await.unwrap();
    advance_secs(1000).await;

    assert_eq!(h.resolver.call_count(), 0);
    assert_eq!(h.provider.total_calls(), 0);

    // Nothing new is accepted once stopped
    let late = h.engine.create_config(v4_config("late.example.com")).await;
    assert!(late.is_err());
    assert_eq!(h.engine.list_configs().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn running_cycle_finishes_before_shutdown_returns() {
    let provider = FakeProvider::new();
    let record_id = provider.seed("home.example.com", RecordType::A, "9.9.9.9");
    provider.hold_reads();
    let h = Harness::new(provider, ScriptedResolver::answering(ip("1.2.3.4")));
    let config = h
        .engine
        .create_config(v4_config("home.example.com").with_record_id(&record_id))
        .await
        .unwrap();
    settle().await;

    advance_secs(301).await;
    assert_eq!(h.provider.reads_entered(), 1);

    let engine = h.engine.clone();
    let stopping = tokio::spawn(async move { engine.shutdown().await });
    settle().await;
    assert!(!stopping.is_finished());

    h.provider.open_reads();
    stopping.await.unwrap().unwrap();

    let stored = h.engine.get_config(&config.id).await.unwrap();
    assert_eq!(stored.status, ConfigStatus::Ok);
    assert_eq!(h.provider.updates().len(), 1);
    assert_eq!(h.store.flush_call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn stuck_cycle_is_abandoned_after_timeout() {
    let provider = FakeProvider::new();
    let record_id = provider.seed("home.example.com", RecordType::A, "9.9.9.9");
    provider.hold_reads();
    let h = Harness::with_engine_config(
        provider,
        ScriptedResolver::answering(ip("1.2.3.4")),
        EngineConfig {
            shutdown_timeout_secs: 10,
            ..Default::default()
        },
    );
    h.engine
        .create_config(v4_config("home.example.com").with_record_id(&record_id))
        .await
        .unwrap();
    settle().await;

    advance_secs(301).await;
    assert_eq!(h.provider.reads_entered(), 1);

    // Paused time auto-advances to the shutdown deadline
    h.engine.shutdown().await.unwrap();

    assert_eq!(h.provider.update_call_count(), 0);
    assert_eq!(h.store.flush_call_count(), 1);
}

#[tokio::test]
async fn file_store_is_written_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("configs.json");
    let store = Arc::new(FileConfigStore::new(&path).await.unwrap());

    let (engine, _events) = DdnsEngine::new(
        store,
        Arc::new(FakeProvider::new()),
        Arc::new(ScriptedResolver::answering(ip("1.2.3.4"))),
        EngineConfig::default(),
    )
    .unwrap();
    let config = engine
        .create_config(v4_config("home.example.com"))
        .await
        .unwrap();
    engine.shutdown().await.unwrap();

    let contents = tokio::fs::read_to_string(&path).await.unwrap();
    assert!(
        contents.contains(&config.id),
        "Store file should contain the config, got {}",
        contents
    );
}
