// Copyright (c) 2025 - Cowboy AI, Inc.
//! Secret Store
//!
//! One structured credential bundle per environment. The bundle value is
//! written once on create and is owned elsewhere afterwards; consumers only
//! ever receive a reference (bundle ARN + field selector).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ModuleContext;
use crate::domain::{ResourceKind, SecretField, ValidationError};
use crate::errors::TopologyResult;
use crate::graph::{AttributeValue, ResourceGraph, ResourceNode};

pub const MODULE: &str = "secrets";

/// Credential bundle fields; values never appear in `Debug` output
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensitiveMap(BTreeMap<String, String>);

impl SensitiveMap {
    pub fn new(fields: BTreeMap<String, String>) -> Self {
        Self(fields)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &String> {
        self.0.values()
    }

    fn to_json(&self) -> TopologyResult<String> {
        Ok(serde_json::to_string(&self.0)?)
    }
}

impl fmt::Debug for SensitiveMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|k| (k, "********")))
            .finish()
    }
}

impl FromIterator<(String, String)> for SensitiveMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Secret store input contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretsInput {
    pub name: String,
    pub description: String,
    pub fields: SensitiveMap,
    pub recovery_window_days: u32,
}

/// Secret store outputs
///
/// Only the bundle ARN and field names leave this module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretsOutputs {
    pub bundle_arn: AttributeValue,
    pub fields: BTreeSet<SecretField>,
}

impl SecretsOutputs {
    /// `valueFrom` selector for one bundle field, rejecting unknown fields
    pub fn reference(&self, variable: &str, field: &SecretField) -> TopologyResult<AttributeValue> {
        if !self.fields.contains(field) {
            return Err(ValidationError::UnknownSecretField {
                variable: variable.to_string(),
                field: field.to_string(),
            }
            .into());
        }
        Ok(AttributeValue::concat([
            self.bundle_arn.clone(),
            format!(":{}::", field).into(),
        ]))
    }
}

/// Build the secret store
pub fn build(
    graph: &mut ResourceGraph,
    ctx: &ModuleContext,
    input: &SecretsInput,
) -> TopologyResult<SecretsOutputs> {
    let fields = input
        .fields
        .keys()
        .map(|k| SecretField::new(k.as_str()))
        .collect::<Result<BTreeSet<_>, _>>()
        .map_err(ValidationError::from)?;
    if fields.is_empty() {
        return Err(ValidationError::invalid("secrets.fields", "bundle needs at least one field").into());
    }
    if input.recovery_window_days != 0 && !(7..=30).contains(&input.recovery_window_days) {
        return Err(ValidationError::invalid(
            "secrets.recovery_window_days",
            "must be 0 or between 7 and 30",
        )
        .into());
    }

    let mut scope = graph.module(MODULE);

    let secret = scope.add(
        ResourceNode::new(scope.address(ResourceKind::Secret, "bundle"))
            .attr("name", input.name.as_str())
            .attr("description", input.description.as_str())
            .attr("recovery_window_in_days", input.recovery_window_days)
            .attr("tags", ctx.tags(&input.name))
            .replace_on_change("name"),
    );

    scope.add(
        ResourceNode::new(scope.address(ResourceKind::SecretVersion, "bundle"))
            .attr("secret_id", secret.output("id"))
            .attr("secret_string", AttributeValue::sensitive(input.fields.to_json()?))
            .externally_owned("secret_string"),
    );

    let outputs = SecretsOutputs {
        bundle_arn: secret.output("arn"),
        fields,
    };
    scope.output("secret_arn", outputs.bundle_arn.clone());
    scope.finish()?;

    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{AttributePolicy, NodeAddress};
    use crate::modules::fixtures;
    use pretty_assertions::assert_eq;

    fn input() -> SecretsInput {
        SecretsInput {
            name: "webhook-dev-credentials".to_string(),
            description: "Webhook credentials".to_string(),
            fields: [
                ("LW_API_BOT_SECRET".to_string(), "s3cr3t-value".to_string()),
                ("CRM_TOKEN".to_string(), "tok-123".to_string()),
            ]
            .into_iter()
            .collect(),
            recovery_window_days: 0,
        }
    }

    #[test]
    fn test_bundle_value_is_sensitive_and_externally_owned() {
        let mut graph = ResourceGraph::new();
        build(&mut graph, &fixtures::dev(), &input()).unwrap();

        let version = graph
            .node(&NodeAddress::new(MODULE, ResourceKind::SecretVersion, "bundle"))
            .unwrap();
        assert!(version.get("secret_string").unwrap().contains_sensitive());
        assert_eq!(
            version.policy_for("secret_string"),
            AttributePolicy::ExternallyOwnedAfterCreate
        );

        let serialised = serde_json::to_string(&graph).unwrap();
        assert!(!serialised.contains("s3cr3t-value"));
        assert!(!serialised.contains("tok-123"));
    }

    #[test]
    fn test_reference_rendering() {
        let mut graph = ResourceGraph::new();
        let outputs = build(&mut graph, &fixtures::dev(), &input()).unwrap();

        let field = SecretField::new("CRM_TOKEN").unwrap();
        let reference = outputs.reference("CRM_TOKEN", &field).unwrap();
        assert_eq!(
            reference,
            AttributeValue::concat([
                NodeAddress::new(MODULE, ResourceKind::Secret, "bundle").output("arn"),
                ":CRM_TOKEN::".into(),
            ])
        );

        let missing = SecretField::new("NOT_THERE").unwrap();
        assert!(outputs.reference("X", &missing).is_err());
    }

    #[test]
    fn test_debug_masks_values() {
        let debug = format!("{:?}", input().fields);
        assert!(debug.contains("CRM_TOKEN"));
        assert!(!debug.contains("tok-123"));
    }
}
