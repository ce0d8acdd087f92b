// Copyright (c) 2025 - Cowboy AI, Inc.
//! State Record
//!
//! The durable record of what the last evaluation applied, one per
//! environment. Every applied attribute is stored in redacted form, and
//! outputs derived from sensitive inputs are never recorded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::domain::EnvironmentName;
use crate::graph::{NodeAddress, OutputRef, ResourceNode};

/// Recorded status of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    #[default]
    Created,
    /// A mutating call failed part-way; the next plan replaces the node
    Tainted,
}

/// State of one applied node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Declaration as of the last successful apply
    pub declared: ResourceNode,
    /// Attribute values sent to the provider, redacted
    pub applied: BTreeMap<String, Value>,
    /// Provider-reported outputs
    pub outputs: BTreeMap<String, Value>,
    /// Producers this node depended on when applied
    #[serde(default)]
    pub dependencies: BTreeSet<NodeAddress>,
    #[serde(default)]
    pub status: ResourceStatus,
}

impl ResourceState {
    /// Provider identifier for this node
    pub fn id(&self) -> Option<&str> {
        self.outputs.get("id").and_then(Value::as_str)
    }

    pub fn is_tainted(&self) -> bool {
        self.status == ResourceStatus::Tainted
    }
}

/// Durable, versioned record of one environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Fixed for the lifetime of the environment
    pub lineage: Uuid,
    /// Incremented on every persist
    pub serial: u64,
    pub environment: EnvironmentName,
    #[serde(default)]
    pub resources: BTreeMap<NodeAddress, ResourceState>,
    /// Resolved root outputs
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    pub updated_at: DateTime<Utc>,
}

impl StateRecord {
    /// Empty record for a new environment
    pub fn new(environment: EnvironmentName) -> Self {
        Self {
            lineage: Uuid::now_v7(),
            serial: 0,
            environment,
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn resource(&self, address: &NodeAddress) -> Option<&ResourceState> {
        self.resources.get(address)
    }

    pub fn contains(&self, address: &NodeAddress) -> bool {
        self.resources.contains_key(address)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Known value of a producer's output
    pub fn lookup(&self, reference: &OutputRef) -> Option<Value> {
        self.resources
            .get(&reference.address)
            .and_then(|resource| resource.outputs.get(&reference.attribute))
            .cloned()
    }

    /// Recorded nodes that depended on `address`
    pub fn dependents(&self, address: &NodeAddress) -> BTreeSet<NodeAddress> {
        self.resources
            .iter()
            .filter(|(_, resource)| resource.dependencies.contains(address))
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    /// Reverse dependency order for deleting a set of recorded nodes
    ///
    /// Consumers come before their producers; ties break on address order.
    pub fn deletion_order(&self, targets: &BTreeSet<NodeAddress>) -> Vec<NodeAddress> {
        let mut remaining = targets.clone();
        let mut order = Vec::with_capacity(targets.len());

        while !remaining.is_empty() {
            let ready: Vec<NodeAddress> = remaining
                .iter()
                .filter(|address| {
                    self.dependents(address)
                        .iter()
                        .all(|consumer| !remaining.contains(consumer))
                })
                .cloned()
                .collect();

            // Recorded dependencies are acyclic unless the record was edited by hand
            let batch = if ready.is_empty() {
                remaining.iter().cloned().collect()
            } else {
                ready
            };
            for address in batch {
                remaining.remove(&address);
                order.push(address);
            }
        }

        order
    }

    /// Serialized form used by every backend
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Holder of an environment's exclusive lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub id: Uuid,
    pub environment: EnvironmentName,
    /// Who holds the lock (user@host or pipeline run)
    pub holder: String,
    /// Operation being performed
    pub operation: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockInfo {
    pub fn new(environment: EnvironmentName, holder: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            environment,
            holder: holder.into(),
            operation: operation.into(),
            acquired_at: Utc::now(),
        }
    }
}
