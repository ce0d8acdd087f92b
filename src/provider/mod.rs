// Copyright (c) 2025 - Cowboy AI, Inc.
//! Provider Interface
//!
//! The seam between the evaluator and a cloud control plane. A provider sees
//! fully resolved attribute maps (plaintext where sensitive) and returns the
//! outputs the platform assigned.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::TopologyResult;
use crate::graph::NodeAddress;

pub mod simulated;

pub use simulated::SimulatedProvider;

/// Resolved attributes or outputs of one node
pub type AttributeMap = BTreeMap<String, Value>;

/// Provider operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Read,
}

impl Operation {
    /// Whether the operation changes remote infrastructure
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Read)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Read => "read",
        };
        f.write_str(name)
    }
}

/// Cloud control-plane operations
///
/// Every rejection is reported as `TopologyError::ProviderRejection` naming
/// the node, so the evaluator can record siblings and skip dependents.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Create a node; outputs always carry `id`
    async fn create(&self, address: &NodeAddress, attributes: &AttributeMap) -> TopologyResult<AttributeMap>;

    /// Update a node in place with its managed attributes
    async fn update(
        &self,
        address: &NodeAddress,
        id: &str,
        attributes: &AttributeMap,
    ) -> TopologyResult<AttributeMap>;

    async fn delete(&self, address: &NodeAddress, id: &str) -> TopologyResult<()>;

    /// Live attributes, or `None` if the node no longer exists
    async fn read(&self, address: &NodeAddress, id: &str) -> TopologyResult<Option<AttributeMap>>;
}
