// Copyright (c) 2025 - Cowboy AI, Inc.
//! Image Registry
//!
//! One versioned artifact namespace per environment with a count-bounded
//! expiry rule and a pull-only access statement for the orchestrator
//! principal.

use serde::{Deserialize, Serialize};

use super::ModuleContext;
use crate::domain::{ResourceKind, ValidationError};
use crate::errors::TopologyResult;
use crate::graph::{AttributeValue, ResourceGraph, ResourceNode};

pub const MODULE: &str = "registry";

/// Tag overwrite policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagMutability {
    #[default]
    Mutable,
    Immutable,
}

impl TagMutability {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Mutable => "MUTABLE",
            Self::Immutable => "IMMUTABLE",
        }
    }
}

/// Registry input contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryInput {
    pub repository_name: String,
    pub tag_mutability: TagMutability,
    pub scan_on_push: bool,
    /// Images retained before the oldest expire
    pub max_image_count: u32,
    /// Principals granted pull access
    pub pull_principals: Vec<AttributeValue>,
}

/// Registry outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryOutputs {
    pub repository_arn: AttributeValue,
    pub repository_url: AttributeValue,
}

const PULL_ACTIONS: &[&str] = &[
    "ecr:BatchCheckLayerAvailability",
    "ecr:BatchGetImage",
    "ecr:GetDownloadUrlForLayer",
];

/// Build the registry
pub fn build(
    graph: &mut ResourceGraph,
    ctx: &ModuleContext,
    input: &RegistryInput,
) -> TopologyResult<RegistryOutputs> {
    if input.max_image_count == 0 {
        return Err(ValidationError::invalid("registry.max_image_count", "must be at least 1").into());
    }
    if input.repository_name.is_empty()
        || !input
            .repository_name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '/' | '.'))
    {
        return Err(ValidationError::invalid(
            "registry.repository_name",
            "lowercase letters, digits, and - _ / . only",
        )
        .into());
    }

    let mut scope = graph.module(MODULE);

    let repository = scope.add(
        ResourceNode::new(scope.address(ResourceKind::ContainerRepository, "this"))
            .attr("name", input.repository_name.as_str())
            .attr("image_tag_mutability", input.tag_mutability.as_str())
            .attr(
                "image_scanning_configuration",
                AttributeValue::map([("scan_on_push", input.scan_on_push.into())]),
            )
            .attr(
                "encryption_configuration",
                AttributeValue::map([("encryption_type", "AES256".into())]),
            )
            .attr("tags", ctx.tags(&input.repository_name))
            .replace_on_change("name")
            .replace_on_change("encryption_configuration"),
    );

    let lifecycle = AttributeValue::json(AttributeValue::map([(
        "rules",
        AttributeValue::list([AttributeValue::map([
            ("rulePriority", 1u32.into()),
            (
                "description",
                format!("Keep the newest {} images", input.max_image_count).into(),
            ),
            (
                "selection",
                AttributeValue::map([
                    ("tagStatus", "any".into()),
                    ("countType", "imageCountMoreThan".into()),
                    ("countNumber", input.max_image_count.into()),
                ]),
            ),
            ("action", AttributeValue::map([("type", "expire".into())])),
        ])]),
    )]));
    scope.add(
        ResourceNode::new(scope.address(ResourceKind::RepositoryLifecyclePolicy, "this"))
            .attr("repository", repository.output("name"))
            .attr("policy", lifecycle),
    );

    if !input.pull_principals.is_empty() {
        let policy = AttributeValue::json(AttributeValue::map([
            ("Version", "2012-10-17".into()),
            (
                "Statement",
                AttributeValue::list([AttributeValue::map([
                    ("Sid", "AllowPull".into()),
                    ("Effect", "Allow".into()),
                    (
                        "Principal",
                        AttributeValue::map([("AWS", AttributeValue::List(input.pull_principals.clone()))]),
                    ),
                    ("Action", AttributeValue::list(PULL_ACTIONS.iter().copied())),
                ])]),
            ),
        ]));
        scope.add(
            ResourceNode::new(scope.address(ResourceKind::RepositoryPolicy, "pull"))
                .attr("repository", repository.output("name"))
                .attr("policy", policy),
        );
    }

    let outputs = RegistryOutputs {
        repository_arn: repository.output("arn"),
        repository_url: repository.output("repository_url"),
    };
    scope.output("repository_arn", outputs.repository_arn.clone());
    scope.output("repository_url", outputs.repository_url.clone());
    scope.finish()?;

    Ok(outputs)
}
