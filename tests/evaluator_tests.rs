// Copyright (c) 2025 - Cowboy AI, Inc.
//! Evaluator integration tests
//!
//! Full compose → plan → apply cycles against the simulated control plane:
//! convergence, drift handling, lock contention, partial failure recovery,
//! and the guarantee that credential plaintext never reaches state.

mod fixtures;

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

use fixtures::Harness;
use webhook_topology::domain::ResourceKind;
use webhook_topology::plan::{ActionKind, ChangeReason};
use webhook_topology::state::{FileStateBackend, LockInfo, StateBackend};
use webhook_topology::state_machine::deployment::DeploymentOutcome;
use webhook_topology::{Evaluator, NodeAddress, SimulatedProvider, TopologyError};

/// Scenario: a second apply of an unchanged graph is a no-op
///
/// Given an environment applied once
/// When the same graph is applied again
/// Then no provider mutation is issued and no new record is written
#[tokio::test]
async fn test_second_apply_changes_nothing() {
    let harness = Harness::new();
    let composition = fixtures::composed(&fixtures::dev());

    let first = harness.evaluator.apply(&composition).await.unwrap();
    assert!(first.is_success(), "{:?}", first.failed);
    assert!(first.persisted);
    assert_eq!(first.serial, 1);
    let persists = harness.backend.persist_count().await;

    harness.provider.reset_operations().await;
    let second = harness.evaluator.apply(&composition).await.unwrap();

    assert!(second.is_success());
    assert!(!second.persisted);
    assert!(second.applied.is_empty());
    assert_eq!(harness.provider.mutation_count().await, 0);
    assert_eq!(harness.backend.persist_count().await, persists);
    assert_eq!(second.outputs, first.outputs);
}

/// Scenario: the dev environment serves traffic after one apply
#[tokio::test]
async fn test_dev_environment_serves_one_task() {
    let harness = Harness::new();
    let composition = fixtures::composed(&fixtures::dev());

    let report = harness.evaluator.apply(&composition).await.unwrap();
    assert!(report.is_success(), "{:?}", report.failed);

    assert_eq!(harness.provider.running_tasks(&fixtures::service()).await, 1);
    assert_eq!(harness.provider.registered_targets(&fixtures::target_group()).await, 1);
    assert_eq!(composition.graph.count_of(ResourceKind::ScalableTarget), 0);

    let url = report.outputs["webhook_url"].as_str().unwrap();
    assert!(url.starts_with("https://"), "{}", url);
    assert!(url.ends_with("/dev/webhook"), "{}", url);
    assert!(report.outputs["repository_url"]
        .as_str()
        .unwrap()
        .ends_with(".amazonaws.com/webhook-dev"));
}

/// Scenario: orchestrator-owned attributes are never reverted
///
/// Given a service whose task definition was rolled forward by the pipeline
/// When the environment is planned
/// Then the plan is empty
#[tokio::test]
async fn test_externally_owned_drift_ignored() {
    let harness = Harness::new();
    let composition = fixtures::composed(&fixtures::dev());
    harness.evaluator.apply(&composition).await.unwrap();

    assert!(
        harness
            .provider
            .drift(&fixtures::service(), "task_definition", json!("arn:aws:ecs:td/webhook-dev-app:42"))
            .await
    );
    assert!(
        harness
            .provider
            .drift(&fixtures::cache_group(), "node_type", json!("cache.t4g.small"))
            .await
    );

    let plan = harness.evaluator.plan(&composition).await.unwrap();
    assert!(!plan.has_changes(), "{}", plan.render_text());
}

#[tokio::test]
async fn test_scaler_owned_desired_count_ignored() {
    let harness = Harness::new();
    let composition = fixtures::composed(&fixtures::staging());
    harness.evaluator.apply(&composition).await.unwrap();

    harness.provider.drift(&fixtures::service(), "desired_count", json!(4)).await;

    let plan = harness.evaluator.plan(&composition).await.unwrap();
    assert!(!plan.has_changes(), "{}", plan.render_text());
}

/// Scenario: drift on a managed attribute is corrected
#[tokio::test]
async fn test_managed_drift_corrected() {
    let harness = Harness::new();
    let composition = fixtures::composed(&fixtures::dev());
    harness.evaluator.apply(&composition).await.unwrap();

    harness.provider.drift(&fixtures::service(), "desired_count", json!(3)).await;

    let plan = harness.evaluator.plan(&composition).await.unwrap();
    let action = plan.action(&fixtures::service()).unwrap();
    assert_eq!(action.kind, ActionKind::Update);
    assert!(action.reasons.contains(&ChangeReason::Drift));
    assert_eq!(plan.summary().update, 1);

    let report = harness.evaluator.apply(&composition).await.unwrap();
    assert!(report.is_success(), "{:?}", report.failed);
    let live = harness.provider.live_attributes(&fixtures::service()).await.unwrap();
    assert_eq!(live["desired_count"], json!(1));

    let plan = harness.evaluator.plan(&composition).await.unwrap();
    assert!(!plan.has_changes(), "{}", plan.render_text());
}

/// Scenario: a held lock fails fast
///
/// Given another run holds the environment lock
/// When an apply starts
/// Then it fails with LockContention before any provider call
#[tokio::test]
async fn test_lock_contention_makes_no_provider_calls() {
    let harness = Harness::new();
    let composition = fixtures::composed(&fixtures::dev());
    let held = LockInfo::new(composition.environment.clone(), "ci-runner", "apply");
    harness.backend.lock(&held).await.unwrap();

    let result = harness.evaluator.apply(&composition).await;

    match result {
        Err(TopologyError::LockContention { environment, holder }) => {
            assert_eq!(environment, "dev");
            assert_eq!(holder, "ci-runner");
        }
        other => panic!("expected lock contention, got {:?}", other.map(|r| r.summary())),
    }
    assert!(harness.provider.operations().await.is_empty());
    assert!(harness.backend.load(&composition.environment).await.unwrap().is_none());

    // Once released, the same apply goes through
    harness.backend.unlock(&held).await.unwrap();
    assert!(harness.evaluator.apply(&composition).await.unwrap().is_success());
}

#[tokio::test]
async fn test_plan_also_requires_lock() {
    let harness = Harness::new();
    let composition = fixtures::composed(&fixtures::dev());
    let held = LockInfo::new(composition.environment.clone(), "operator", "apply");
    harness.backend.lock(&held).await.unwrap();

    assert!(matches!(
        harness.evaluator.plan(&composition).await,
        Err(TopologyError::LockContention { .. })
    ));
}

/// Scenario: a provider rejection fails one node and its dependents only
///
/// Given the registry refuses to create the repository
/// When the environment is applied
/// Then unrelated nodes are recorded, dependents are skipped, and a re-run
/// after the rejection clears creates only what is missing
#[tokio::test]
async fn test_rejected_node_skips_dependents_and_recovers() {
    let harness = Harness::new();
    let composition = fixtures::composed(&fixtures::dev());
    let repository = NodeAddress::new("registry", ResourceKind::ContainerRepository, "this");
    let task_definition = NodeAddress::new("compute", ResourceKind::TaskDefinition, "app");
    let vpc = NodeAddress::new("network", ResourceKind::Vpc, "this");

    harness.provider.reject(&repository, "repository quota exceeded").await;
    let report = harness.evaluator.apply(&composition).await.unwrap();

    assert!(!report.is_success());
    assert!(report.failure(&repository).unwrap().error.contains("quota"));
    assert!(report.was_skipped(&task_definition));
    assert!(report.was_skipped(&fixtures::service()));
    assert!(report.persisted);
    assert!(!report.outputs.contains_key("repository_url"));

    let record = harness.backend.load(&composition.environment).await.unwrap().unwrap();
    assert!(record.contains(&vpc));
    assert!(record.contains(&fixtures::cache_group()));
    assert!(!record.contains(&repository));
    assert!(!record.contains(&task_definition));
    let recorded = record.len();

    harness.provider.clear_rejection(&repository).await;
    let retry = harness.evaluator.apply(&composition).await.unwrap();
    assert!(retry.is_success(), "{:?}", retry.failed);
    assert_eq!(retry.summary().create, composition.graph.len() - recorded);
    assert!(retry.outputs.contains_key("repository_url"));

    let plan = harness.evaluator.plan(&composition).await.unwrap();
    assert!(!plan.has_changes(), "{}", plan.render_text());
}

/// Scenario: credential plaintext stays out of state and outputs
#[tokio::test]
async fn test_no_plaintext_credentials_in_state() {
    let harness = Harness::new();
    let params = fixtures::dev();
    let composition = fixtures::composed(&params);

    let report = harness.evaluator.apply(&composition).await.unwrap();
    assert!(report.is_success(), "{:?}", report.failed);

    let record = harness.backend.load(&composition.environment).await.unwrap().unwrap();
    let serialized = String::from_utf8(record.to_bytes().unwrap()).unwrap();
    let outputs = serde_json::to_string(&report.outputs).unwrap();
    for plaintext in params.sensitive.values() {
        assert!(!serialized.contains(plaintext.as_str()), "state leaks a credential");
        assert!(!outputs.contains(plaintext.as_str()), "outputs leak a credential");
    }

    // The secret store itself received the real bundle
    let version = NodeAddress::new("secrets", ResourceKind::SecretVersion, "bundle");
    let live = harness.provider.live_attributes(&version).await.unwrap();
    let bundle = live["secret_string"].as_str().unwrap();
    assert!(bundle.contains("dev-signing-secret-placeholder"));
    assert!(serialized.contains("sha256:"));
}

/// Scenario: a forced replacement of the task definition creates first
#[tokio::test]
async fn test_tainted_task_definition_replaced_before_destroy() {
    let harness = Harness::new();
    let composition = fixtures::composed(&fixtures::dev());
    let task_definition = NodeAddress::new("compute", ResourceKind::TaskDefinition, "app");
    harness.evaluator.apply(&composition).await.unwrap();

    harness
        .evaluator
        .taint(&composition.environment, &task_definition)
        .await
        .unwrap();

    let plan = harness.evaluator.plan(&composition).await.unwrap();
    let action = plan.action(&task_definition).unwrap();
    assert_eq!(
        action.kind,
        ActionKind::Replace {
            create_before_destroy: true
        }
    );
    assert!(action.reasons.contains(&ChangeReason::Tainted));

    let before = harness.provider.resource_count().await;
    let report = harness.evaluator.apply(&composition).await.unwrap();
    assert!(report.is_success(), "{:?}", report.failed);
    assert_eq!(harness.provider.resource_count().await, before);
    assert_eq!(harness.provider.running_tasks(&fixtures::service()).await, 1);

    let plan = harness.evaluator.plan(&composition).await.unwrap();
    assert!(!plan.has_changes(), "{}", plan.render_text());
}

/// Scenario: a failing rollout keeps the previous tasks serving
#[tokio::test]
async fn test_failed_rollout_keeps_capacity() {
    let harness = Harness::new();
    let composition = fixtures::composed(&fixtures::dev());
    harness.evaluator.apply(&composition).await.unwrap();

    harness.provider.fail_task_launches(&fixtures::service(), 3).await;
    let outcome = harness.provider.roll_out(&fixtures::service()).await.unwrap();

    assert_eq!(
        outcome,
        DeploymentOutcome::RolledBack {
            failures: 3,
            serving: 1
        }
    );
    assert_eq!(harness.provider.running_tasks(&fixtures::service()).await, 1);
    assert_eq!(harness.provider.registered_targets(&fixtures::target_group()).await, 1);

    let outcome = harness.provider.roll_out(&fixtures::service()).await.unwrap();
    assert_eq!(outcome, DeploymentOutcome::Completed { running: 1 });
}

/// Scenario: a removed feature is deleted consumers-first
#[tokio::test]
async fn test_disabling_protection_deletes_its_nodes() {
    let harness = Harness::new();
    let enabled = fixtures::staging();
    harness.evaluator.apply(&fixtures::composed(&enabled)).await.unwrap();

    let mut disabled = enabled.clone();
    disabled.ingress.protection = webhook_topology::modules::Toggle::Disabled;
    let composition = fixtures::composed(&disabled);
    let acl = NodeAddress::new("ingress", ResourceKind::WebAcl, "this");
    let association = NodeAddress::new("ingress", ResourceKind::WebAclAssociation, "stage");

    let plan = harness.evaluator.plan(&composition).await.unwrap();
    let deletes: Vec<&NodeAddress> = plan
        .changes()
        .filter(|action| action.kind == ActionKind::Delete)
        .map(|action| &action.address)
        .collect();
    assert_eq!(deletes, vec![&association, &acl]);

    let report = harness.evaluator.apply(&composition).await.unwrap();
    assert!(report.is_success(), "{:?}", report.failed);
    assert!(!harness.provider.exists(&acl).await);
    assert!(!report.outputs.contains_key("web_acl_arn"));
}

/// Scenario: state survives a process restart on the file backend
#[tokio::test]
async fn test_file_backend_round_trip_plans_clean() {
    let dir = tempfile::tempdir().unwrap();
    let composition = fixtures::composed(&fixtures::dev());

    let backend: Arc<dyn StateBackend> = Arc::new(FileStateBackend::new(dir.path()));
    let provider = Arc::new(SimulatedProvider::default());
    let report = Evaluator::new(backend, provider)
        .apply(&composition)
        .await
        .unwrap();
    assert!(report.is_success(), "{:?}", report.failed);

    // A fresh process: new backend handle, provider rebuilt from the record
    let backend: Arc<dyn StateBackend> = Arc::new(FileStateBackend::new(dir.path()));
    let record = backend.load(&composition.environment).await.unwrap().unwrap();
    assert_eq!(record.serial, 1);
    let provider = Arc::new(SimulatedProvider::from_state("ap-northeast-1", &record));

    let plan = Evaluator::new(backend, provider).plan(&composition).await.unwrap();
    assert!(!plan.has_changes(), "{}", plan.render_text());
}

#[tokio::test]
async fn test_destroy_removes_everything() {
    let harness = Harness::new();
    let composition = fixtures::composed(&fixtures::production());
    harness.evaluator.apply(&composition).await.unwrap();

    let report = harness.evaluator.destroy(&composition.environment).await.unwrap();
    assert!(report.is_success(), "{:?}", report.failed);
    assert_eq!(report.summary().delete, composition.graph.len());
    assert_eq!(harness.provider.resource_count().await, 0);
}
