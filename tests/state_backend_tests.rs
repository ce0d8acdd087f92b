// Copyright (c) 2025 - Cowboy AI, Inc.
//! State backend integration tests
//!
//! The file backend runs against a temporary directory. The NATS backend
//! needs a JetStream-enabled server and is ignored by default:
//!
//! ```bash
//! nats-server -js &
//! cargo test --test state_backend_tests -- --ignored
//! ```

mod fixtures;

use pretty_assertions::assert_eq;
use std::sync::Arc;
use uuid::Uuid;

use fixtures::Harness;
use webhook_topology::domain::EnvironmentName;
use webhook_topology::state::{
    FileStateBackend, LockInfo, NatsStateBackend, NatsStateConfig, StateBackend, StateRecord,
};
use webhook_topology::{Evaluator, SimulatedProvider, TopologyError};

/// Two handles on one state directory behave like two processes
#[tokio::test]
async fn test_file_lock_excludes_second_process() {
    let dir = tempfile::tempdir().unwrap();
    let first = FileStateBackend::new(dir.path());
    let second = FileStateBackend::new(dir.path());
    let environment = EnvironmentName::new("staging").unwrap();

    let held = LockInfo::new(environment.clone(), "first", "apply");
    first.lock(&held).await.unwrap();

    let attempt = LockInfo::new(environment.clone(), "second", "plan");
    match second.lock(&attempt).await {
        Err(TopologyError::LockContention { holder, .. }) => assert_eq!(holder, "first"),
        other => panic!("expected lock contention, got {:?}", other),
    }
    assert_eq!(second.lock_holder(&environment).await.unwrap().unwrap().holder, "first");

    first.unlock(&held).await.unwrap();
    second.lock(&attempt).await.unwrap();
    second.unlock(&attempt).await.unwrap();
    assert!(first.lock_holder(&environment).await.unwrap().is_none());
}

/// An evaluator blocked by a lock in the file backend leaves the directory untouched
#[tokio::test]
async fn test_evaluator_respects_file_lock() {
    let dir = tempfile::tempdir().unwrap();
    let composition = fixtures::composed(&fixtures::dev());
    let backend = Arc::new(FileStateBackend::new(dir.path()));
    let held = LockInfo::new(composition.environment.clone(), "operator", "apply");
    backend.lock(&held).await.unwrap();

    let provider = Arc::new(SimulatedProvider::default());
    let evaluator = Evaluator::new(backend.clone(), provider.clone());
    assert!(matches!(
        evaluator.apply(&composition).await,
        Err(TopologyError::LockContention { .. })
    ));
    assert_eq!(provider.operations().await.len(), 0);
    assert!(backend.load(&composition.environment).await.unwrap().is_none());
}

/// Every persisted serial is kept in history
#[tokio::test]
async fn test_file_history_tracks_applies() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FileStateBackend::new(dir.path()));
    let provider = Arc::new(SimulatedProvider::default());
    let evaluator = Evaluator::new(backend.clone(), provider);

    let params = fixtures::dev();
    evaluator.apply(&fixtures::composed(&params)).await.unwrap();

    let mut scaled = params.clone();
    scaled.compute.desired_count = 2;
    let report = evaluator.apply(&fixtures::composed(&scaled)).await.unwrap();
    assert!(report.is_success(), "{:?}", report.failed);
    assert_eq!(report.serial, 2);

    assert_eq!(backend.history(&params.environment).await.unwrap(), vec![1, 2]);
}

/// A record written by a stale reader is refused
#[tokio::test]
async fn test_stale_record_refused_after_apply() {
    let harness = Harness::new();
    let composition = fixtures::composed(&fixtures::dev());
    let stale = harness
        .backend
        .load(&composition.environment)
        .await
        .unwrap()
        .unwrap_or_else(|| StateRecord::new(composition.environment.clone()));

    harness.evaluator.apply(&composition).await.unwrap();

    let mut write = stale;
    write.serial += 1;
    assert!(matches!(
        harness.backend.persist(&write).await,
        Err(TopologyError::StateConflict { expected: 0, actual: 1 })
    ));
}

#[tokio::test]
#[ignore = "requires a running NATS server with JetStream"]
async fn test_nats_backend_lock_and_persist() {
    let suffix = Uuid::now_v7().simple().to_string();
    let config = NatsStateConfig {
        url: std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string()),
        state_bucket: format!("TOPOLOGY_STATE_{}", suffix),
        lock_bucket: format!("TOPOLOGY_LOCKS_{}", suffix),
        ..NatsStateConfig::default()
    };
    let backend = Arc::new(NatsStateBackend::connect(config).await.unwrap());
    let environment = EnvironmentName::new("dev").unwrap();

    let held = LockInfo::new(environment.clone(), "first", "apply");
    backend.lock(&held).await.unwrap();
    let attempt = LockInfo::new(environment.clone(), "second", "apply");
    assert!(matches!(
        backend.lock(&attempt).await,
        Err(TopologyError::LockContention { .. })
    ));
    backend.unlock(&held).await.unwrap();

    // A released key still carries a delete marker; it must be claimable once
    backend.lock(&attempt).await.unwrap();
    match backend.lock(&held).await {
        Err(TopologyError::LockContention { holder, .. }) => assert_eq!(holder, "second"),
        other => panic!("expected lock contention, got {:?}", other),
    }
    backend.unlock(&attempt).await.unwrap();

    let provider = Arc::new(SimulatedProvider::default());
    let evaluator = Evaluator::new(backend.clone(), provider);
    let composition = fixtures::composed(&fixtures::dev());
    let report = evaluator.apply(&composition).await.unwrap();
    assert!(report.is_success(), "{:?}", report.failed);

    let record = backend.load(&environment).await.unwrap().unwrap();
    assert_eq!(record.serial, 1);
    assert_eq!(record.len(), composition.graph.len());
    assert!(backend.lock_holder(&environment).await.unwrap().is_none());
}
