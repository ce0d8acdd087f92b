// Copyright (c) 2025 - Cowboy AI, Inc.
//! Resource Nodes
//!
//! A node is one declared infrastructure entity: a stable address, typed
//! configuration, and the policies that govern how later runs treat it.
//!
//! # Attribute Policy
//!
//! Each attribute is either [`AttributePolicy::Managed`] (diffed and
//! drift-corrected on every run) or
//! [`AttributePolicy::ExternallyOwnedAfterCreate`] (sent on create, then
//! owned by something outside this system and never diffed again).
//!
//! # Lifecycle Policy
//!
//! Attributes listed in `replace_on_change` cannot be updated in place; a
//! change to one of them replaces the node. `create_before_destroy` decides
//! whether the replacement comes up before the old node is removed.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use super::value::{AttributeValue, OutputRef};
use crate::domain::ResourceKind;

/// Stable node identity: `module.<module>.<kind>.<name>[<index>]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddress {
    pub module: String,
    pub kind: ResourceKind,
    pub name: String,
    pub index: Option<u32>,
}

/// Address parse failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid node address: {0}")]
pub struct AddressParseError(pub String);

impl NodeAddress {
    pub fn new(module: impl Into<String>, kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            kind,
            name: name.into(),
            index: None,
        }
    }

    pub fn indexed(
        module: impl Into<String>,
        kind: ResourceKind,
        name: impl Into<String>,
        index: u32,
    ) -> Self {
        Self {
            index: Some(index),
            ..Self::new(module, kind, name)
        }
    }

    /// Reference to one of this node's output attributes
    pub fn output(&self, attribute: impl Into<String>) -> AttributeValue {
        AttributeValue::Ref(OutputRef {
            address: self.clone(),
            attribute: attribute.into(),
        })
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module.{}.{}.{}", self.module, self.kind, self.name)?;
        if let Some(index) = self.index {
            write!(f, "[{}]", index)?;
        }
        Ok(())
    }
}

impl FromStr for NodeAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AddressParseError(s.to_string());

        let rest = s.strip_prefix("module.").ok_or_else(invalid)?;
        let mut parts = rest.splitn(3, '.');
        let module = parts.next().filter(|m| !m.is_empty()).ok_or_else(invalid)?;
        let kind = parts
            .next()
            .and_then(ResourceKind::parse)
            .ok_or_else(invalid)?;
        let tail = parts.next().filter(|t| !t.is_empty()).ok_or_else(invalid)?;

        let (name, index) = match tail.split_once('[') {
            Some((name, idx)) => {
                let idx = idx
                    .strip_suffix(']')
                    .and_then(|i| i.parse::<u32>().ok())
                    .ok_or_else(invalid)?;
                (name, Some(idx))
            }
            None => (tail, None),
        };
        if name.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            module: module.to_string(),
            kind,
            name: name.to_string(),
            index,
        })
    }
}

impl Serialize for NodeAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Ownership of a single attribute after creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributePolicy {
    #[default]
    Managed,
    ExternallyOwnedAfterCreate,
}

/// Replacement behaviour of a node
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LifecyclePolicy {
    /// Bring the replacement up before destroying the old node
    #[serde(default)]
    pub create_before_destroy: bool,

    /// Attributes whose change forces replacement
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub replace_on_change: BTreeSet<String>,
}

/// One declared infrastructure entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub address: NodeAddress,
    pub attributes: BTreeMap<String, AttributeValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub policies: BTreeMap<String, AttributePolicy>,
    #[serde(default)]
    pub lifecycle: LifecyclePolicy,
}

impl ResourceNode {
    pub fn new(address: NodeAddress) -> Self {
        Self {
            address,
            attributes: BTreeMap::new(),
            policies: BTreeMap::new(),
            lifecycle: LifecyclePolicy::default(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.address.kind
    }

    /// Set an attribute
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set an attribute only when a value is present
    pub fn attr_opt<V: Into<AttributeValue>>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.attr(key, value),
            None => self,
        }
    }

    /// Mark an attribute as owned elsewhere once the node exists
    pub fn externally_owned(mut self, key: impl Into<String>) -> Self {
        self.policies
            .insert(key.into(), AttributePolicy::ExternallyOwnedAfterCreate);
        self
    }

    /// Mark an attribute as forcing replacement when it changes
    pub fn replace_on_change(mut self, key: impl Into<String>) -> Self {
        self.lifecycle.replace_on_change.insert(key.into());
        self
    }

    pub fn create_before_destroy(mut self) -> Self {
        self.lifecycle.create_before_destroy = true;
        self
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn policy_for(&self, key: &str) -> AttributePolicy {
        self.policies.get(key).copied().unwrap_or_default()
    }

    pub fn forces_replacement(&self, key: &str) -> bool {
        self.lifecycle.replace_on_change.contains(key)
    }

    /// Producer nodes this node reads outputs from
    pub fn references(&self) -> BTreeSet<NodeAddress> {
        self.attributes
            .values()
            .flat_map(|value| value.references())
            .map(|r| r.address.clone())
            .filter(|address| address != &self.address)
            .collect()
    }

    /// Attribute keys that reference a given producer
    pub fn attributes_referencing(&self, producer: &NodeAddress) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|(_, value)| value.references().iter().any(|r| &r.address == producer))
            .map(|(key, _)| key.as_str())
            .collect()
    }
}
