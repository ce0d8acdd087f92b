// Copyright (c) 2025 - Cowboy AI, Inc.
//! Test Fixtures for webhook-topology
//!
//! Parameter sets come from the checked-in environment files so the tests
//! exercise exactly what operators apply.

#![allow(dead_code)]

use std::sync::Arc;

use webhook_topology::composition::Composition;
use webhook_topology::domain::ResourceKind;
use webhook_topology::state::MemoryStateBackend;
use webhook_topology::{compose, EnvironmentParameters, Evaluator, NodeAddress, SimulatedProvider};

pub const DEV: &str = include_str!("../../environments/dev.json");
pub const STAGING: &str = include_str!("../../environments/staging.json");
pub const PRODUCTION: &str = include_str!("../../environments/production.json");

pub fn params(raw: &str) -> EnvironmentParameters {
    EnvironmentParameters::from_json(raw).expect("environment file parses")
}

pub fn dev() -> EnvironmentParameters {
    params(DEV)
}

pub fn staging() -> EnvironmentParameters {
    params(STAGING)
}

pub fn production() -> EnvironmentParameters {
    params(PRODUCTION)
}

pub fn composed(params: &EnvironmentParameters) -> Composition {
    compose(params).expect("environment composes")
}

/// Evaluator over fresh in-memory state and a fresh simulated provider
pub struct Harness {
    pub evaluator: Evaluator,
    pub backend: Arc<MemoryStateBackend>,
    pub provider: Arc<SimulatedProvider>,
}

impl Harness {
    pub fn new() -> Self {
        let backend = Arc::new(MemoryStateBackend::new());
        let provider = Arc::new(SimulatedProvider::default());
        let evaluator = Evaluator::new(backend.clone(), provider.clone()).with_holder("integration-test");
        Self {
            evaluator,
            backend,
            provider,
        }
    }
}

pub fn service() -> NodeAddress {
    NodeAddress::new("compute", ResourceKind::ContainerService, "this")
}

pub fn target_group() -> NodeAddress {
    NodeAddress::new("compute", ResourceKind::TargetGroup, "app")
}

pub fn cache_group() -> NodeAddress {
    NodeAddress::new("cache", ResourceKind::CacheReplicationGroup, "this")
}
