// Copyright (c) 2025 - Cowboy AI, Inc.
//! Container Image Pipeline
//!
//! The build-and-push sequence that feeds the registry, as an ordered plan:
//!
//! ```text
//! login ──> build ──> tag ──> push
//! ```
//!
//! Steps are rendered as commands for an external runner; nothing here
//! executes them. Each step requires the one before it to have succeeded.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::invariants::validate_region;
use crate::domain::ValidationError;
use crate::errors::TopologyResult;

const MAX_TAG_LEN: usize = 128;

/// One pipeline step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum PipelineStep {
    Login { region: String, registry: String },
    Build { context: String, platform: String, local_image: String },
    Tag { source: String, target: String },
    Push { target: String },
}

impl PipelineStep {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::Build { .. } => "build",
            Self::Tag { .. } => "tag",
            Self::Push { .. } => "push",
        }
    }

    /// Shell command for this step
    pub fn command(&self) -> String {
        match self {
            Self::Login { region, registry } => format!(
                "aws ecr get-login-password --region {} | docker login --username AWS --password-stdin {}",
                region, registry
            ),
            Self::Build {
                context,
                platform,
                local_image,
            } => format!("docker build --platform {} -t {} {}", platform, local_image, context),
            Self::Tag { source, target } => format!("docker tag {} {}", source, target),
            Self::Push { target } => format!("docker push {}", target),
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<6} {}", self.name(), self.command())
    }
}

/// Ordered steps for one image tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePipeline {
    pub image: String,
    pub steps: Vec<PipelineStep>,
}

impl ImagePipeline {
    /// Plan the pipeline for `repository_url:tag`
    ///
    /// `repository_url` is the registry output of an applied environment,
    /// e.g. `123456789012.dkr.ecr.ap-northeast-1.amazonaws.com/webhook-dev`.
    pub fn plan(repository_url: &str, tag: &str, region: &str) -> TopologyResult<Self> {
        validate_tag(tag)?;
        validate_region(region)?;
        let (registry, repository) = repository_url
            .split_once('/')
            .filter(|(host, name)| !host.is_empty() && !name.is_empty())
            .filter(|_| {
                repository_url
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/' | ':'))
            })
            .ok_or_else(|| ValidationError::invalid("repository_url", "expected <registry>/<repository>"))?;

        let local_image = format!("{}:{}", repository, tag);
        let image = format!("{}:{}", repository_url, tag);

        Ok(Self {
            image: image.clone(),
            steps: vec![
                PipelineStep::Login {
                    region: region.to_string(),
                    registry: registry.to_string(),
                },
                PipelineStep::Build {
                    context: ".".to_string(),
                    platform: "linux/amd64".to_string(),
                    local_image: local_image.clone(),
                },
                PipelineStep::Tag {
                    source: local_image,
                    target: image.clone(),
                },
                PipelineStep::Push { target: image },
            ],
        })
    }

    pub fn commands(&self) -> Vec<String> {
        self.steps.iter().map(PipelineStep::command).collect()
    }
}

/// Registry tag grammar: `[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}`
fn validate_tag(tag: &str) -> TopologyResult<()> {
    let mut chars = tag.chars();
    let first_ok = chars
        .next()
        .map(|c| c.is_ascii_alphanumeric() || c == '_')
        .unwrap_or(false);
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !first_ok || !rest_ok || tag.len() > MAX_TAG_LEN {
        return Err(ValidationError::invalid("tag", format!("'{}' is not a valid image tag", tag)).into());
    }
    Ok(())
}
