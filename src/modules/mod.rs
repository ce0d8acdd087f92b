// Copyright (c) 2025 - Cowboy AI, Inc.
//! Infrastructure Modules
//!
//! Each module is a pure function of its declared input: it validates the
//! input contract, stages nodes into a [`ModuleScope`](crate::graph::ModuleScope),
//! and returns typed outputs (usually [`AttributeValue::Ref`]s) for its
//! dependents.
//!
//! # Control Flow
//!
//! ```text
//! network ──> {secrets, cache, compute} ──> ingress ──> identity
//!                registry ─────────────────────────────┘
//! ```
//!
//! Cross-module references are resolved at node level: addresses are
//! deterministic, so a module can read an output of a node another module
//! has not built yet. Graph validation catches anything left dangling.
//!
//! # Optional Features
//!
//! Optional features are modelled as [`Toggle`]s and evaluated once per run.
//! An enabled toggle emits its whole subtree; a disabled one emits nothing.

pub mod cache;
pub mod compute;
pub mod identity;
pub mod ingress;
pub mod network;
pub mod registry;
pub mod secrets;
pub mod state_backend;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{EnvironmentName, EnvironmentTier};
use crate::graph::AttributeValue;

/// Optional feature with its configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Toggle<T> {
    Disabled,
    Enabled(T),
}

impl<T> Default for Toggle<T> {
    fn default() -> Self {
        Self::Disabled
    }
}

impl<T> Toggle<T> {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }

    pub fn enabled(&self) -> Option<&T> {
        match self {
            Self::Enabled(config) => Some(config),
            Self::Disabled => None,
        }
    }
}

/// Naming and tagging shared by every module of one environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleContext {
    pub project: String,
    pub environment: EnvironmentName,
    pub tier: EnvironmentTier,
    pub region: String,
    pub tags: BTreeMap<String, String>,
}

impl ModuleContext {
    /// `<project>-<environment>`
    pub fn prefix(&self) -> String {
        format!("{}-{}", self.project, self.environment)
    }

    /// `<project>-<environment>-<suffix>`
    pub fn resource_name(&self, suffix: &str) -> String {
        format!("{}-{}", self.prefix(), suffix)
    }

    /// Standard tag map for a node
    pub fn tags(&self, name: &str) -> AttributeValue {
        let mut tags: BTreeMap<String, AttributeValue> = self
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), AttributeValue::from(v)))
            .collect();
        tags.insert("Name".to_string(), name.into());
        tags.insert("Environment".to_string(), self.environment.as_str().into());
        tags.insert("ManagedBy".to_string(), "webhook-topology".into());
        AttributeValue::Map(tags)
    }
}

/// One IAM-style policy statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyStatement {
    pub sid: String,
    pub effect: &'static str,
    pub actions: Vec<&'static str>,
    pub resources: Vec<AttributeValue>,
}

impl PolicyStatement {
    pub fn allow(sid: impl Into<String>, actions: &[&'static str], resources: Vec<AttributeValue>) -> Self {
        Self {
            sid: sid.into(),
            effect: "Allow",
            actions: actions.to_vec(),
            resources,
        }
    }

    fn to_value(&self) -> AttributeValue {
        AttributeValue::map([
            ("Sid", self.sid.as_str().into()),
            ("Effect", self.effect.into()),
            ("Action", AttributeValue::list(self.actions.iter().copied())),
            ("Resource", AttributeValue::List(self.resources.clone())),
        ])
    }
}

/// JSON-encoded policy document
pub fn policy_document(statements: &[PolicyStatement]) -> AttributeValue {
    AttributeValue::json(AttributeValue::map([
        ("Version", "2012-10-17".into()),
        (
            "Statement",
            AttributeValue::List(statements.iter().map(PolicyStatement::to_value).collect()),
        ),
    ]))
}

/// JSON-encoded trust policy letting a service principal assume a role
pub fn assume_role_policy(service: &str) -> AttributeValue {
    AttributeValue::json(AttributeValue::map([
        ("Version", "2012-10-17".into()),
        (
            "Statement",
            AttributeValue::list([AttributeValue::map([
                ("Effect", "Allow".into()),
                ("Action", "sts:AssumeRole".into()),
                ("Principal", AttributeValue::map([("Service", service.into())])),
            ])]),
        ),
    ]))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn context(environment: &str, tier: EnvironmentTier) -> ModuleContext {
        ModuleContext {
            project: "webhook".to_string(),
            environment: EnvironmentName::new(environment).unwrap(),
            tier,
            region: "ap-northeast-1".to_string(),
            tags: BTreeMap::new(),
        }
    }

    pub fn dev() -> ModuleContext {
        context("dev", EnvironmentTier::Development)
    }
}
