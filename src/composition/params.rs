// Copyright (c) 2025 - Cowboy AI, Inc.
//! Environment Parameter Set
//!
//! One JSON variable file per environment binds account- and policy-specific
//! values to the composition root: network sizing, compute sizing, feature
//! toggles, and the sensitive credential map.
//!
//! Contract checks run in [`EnvironmentParameters::validate`] before any
//! graph is built.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::domain::invariants::{
    validate_log_retention, validate_peer_cap, validate_private_egress, validate_region,
    validate_scaling_bounds, validate_subnet_layout,
    validate_target_utilization, validate_task_shape, validate_webhook_path, validate_zone_alignment,
};
use crate::domain::{
    EnvironmentName, EnvironmentTier, Ipv4Cidr, Port, SecretField, ValidationError,
};
use crate::errors::{TopologyError, TopologyResult};
use crate::modules::cache::MAX_PEERS;
use crate::modules::compute::{Autoscaling, HealthCheck};
use crate::modules::identity::CiCdConfig;
use crate::modules::ingress::{
    AuthorizerConfig, CustomDomainConfig, ProtectionConfig, Throttling, DEFAULT_SIGNATURE_HEADER,
};
use crate::modules::network::NatMode;
use crate::modules::registry::TagMutability;
use crate::modules::secrets::SensitiveMap;
use crate::modules::{ModuleContext, Toggle};

/// Network sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParameters {
    pub cidr: Ipv4Cidr,
    pub zones: Vec<String>,
    pub public_subnets: Vec<Ipv4Cidr>,
    pub private_subnets: Vec<Ipv4Cidr>,
    #[serde(default)]
    pub nat_mode: NatMode,
    #[serde(default)]
    pub enable_vpc_endpoints: bool,
}

/// Registry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_name: Option<String>,
    #[serde(default)]
    pub tag_mutability: TagMutability,
    #[serde(default = "default_true")]
    pub scan_on_push: bool,
    #[serde(default = "default_max_images")]
    pub max_image_count: u32,
}

impl Default for RegistryParameters {
    fn default() -> Self {
        Self {
            repository_name: None,
            tag_mutability: TagMutability::default(),
            scan_on_push: true,
            max_image_count: default_max_images(),
        }
    }
}

/// Secret bundle settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SecretParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Defaults to the tier's recovery window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_window_days: Option<u32>,
}

/// Cache sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheParameters {
    pub node_type: String,
    #[serde(default = "default_one")]
    pub num_cache_clusters: u32,
    #[serde(default = "default_engine_version")]
    pub engine_version: String,
    #[serde(default = "default_parameter_family")]
    pub parameter_group_family: String,
    #[serde(default = "default_cache_port")]
    pub port: Port,
    /// Peers beyond the compute service
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_peer_security_groups: Vec<String>,
    #[serde(default = "default_snapshot_retention")]
    pub snapshot_retention_days: u32,
}

/// Compute sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeParameters {
    #[serde(default = "default_image_tag")]
    pub image_tag: String,
    pub cpu: u32,
    pub memory: u32,
    pub container_port: Port,
    pub desired_count: u32,
    #[serde(default)]
    pub health_check: HealthCheck,
    #[serde(default = "default_grace_period")]
    pub health_check_grace_period_seconds: u32,
    #[serde(default = "default_log_retention")]
    pub log_retention_days: u32,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Variable name to credential bundle field
    #[serde(default)]
    pub secret_environment: BTreeMap<String, SecretField>,
    #[serde(default)]
    pub autoscaling: Toggle<Autoscaling>,
}

/// Ingress settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressParameters {
    pub webhook_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_name: Option<String>,
    #[serde(default = "default_signature_header")]
    pub signature_header: String,
    #[serde(default = "default_log_retention")]
    pub access_log_retention_days: u32,
    #[serde(default)]
    pub throttling: Throttling,
    #[serde(default)]
    pub authorizer: Toggle<AuthorizerConfig>,
    #[serde(default)]
    pub protection: Toggle<ProtectionConfig>,
    #[serde(default)]
    pub custom_domain: Toggle<CustomDomainConfig>,
}

/// Identity settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IdentityParameters {
    /// Grant the task runtime role read access to the bundle
    #[serde(default)]
    pub runtime_secret_access: bool,
    #[serde(default)]
    pub ci_cd: Toggle<CiCdConfig>,
}

/// State backend names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateBackendParameters {
    pub bucket_name: String,
    pub lock_table_name: String,
}

/// Per-environment parameter set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentParameters {
    pub project: String,
    pub environment: EnvironmentName,
    pub tier: EnvironmentTier,
    pub region: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    pub network: NetworkParameters,
    #[serde(default)]
    pub registry: RegistryParameters,
    #[serde(default)]
    pub secrets: SecretParameters,
    pub cache: CacheParameters,
    pub compute: ComputeParameters,
    pub ingress: IngressParameters,
    #[serde(default)]
    pub identity: IdentityParameters,
    pub state_backend: StateBackendParameters,
    /// Credential bundle fields, placed once at provisioning time
    #[serde(default)]
    pub sensitive: SensitiveMap,
}

impl EnvironmentParameters {
    pub fn from_json(raw: &str) -> TopologyResult<Self> {
        serde_json::from_str(raw).map_err(|e| TopologyError::Configuration(format!("invalid parameter file: {}", e)))
    }

    /// Load a variable file
    pub async fn load(path: impl AsRef<Path>) -> TopologyResult<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            TopologyError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    /// Canonical rendering used by `fmt`
    pub fn to_canonical_json(&self) -> TopologyResult<String> {
        let mut rendered = serde_json::to_string_pretty(self)?;
        rendered.push('\n');
        Ok(rendered)
    }

    pub fn context(&self) -> ModuleContext {
        ModuleContext {
            project: self.project.clone(),
            environment: self.environment.clone(),
            tier: self.tier,
            region: self.region.clone(),
            tags: self.tags.clone(),
        }
    }

    pub fn repository_name(&self) -> String {
        self.registry
            .repository_name
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.project, self.environment))
    }

    pub fn stage_name(&self) -> String {
        self.ingress
            .stage_name
            .clone()
            .unwrap_or_else(|| self.environment.to_string())
    }

    pub fn secret_recovery_window_days(&self) -> u32 {
        self.secrets
            .recovery_window_days
            .unwrap_or_else(|| self.tier.secret_recovery_window_days())
    }

    /// Run every contract check; nothing is built if this fails
    pub fn validate(&self) -> TopologyResult<()> {
        if self.project.is_empty()
            || !self.project.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ValidationError::invalid("project", "lowercase letters, digits, and '-' only").into());
        }
        validate_region(&self.region)?;

        let net = &self.network;
        validate_zone_alignment(&net.zones, &net.public_subnets, &net.private_subnets)?;
        validate_subnet_layout(&net.cidr, &net.public_subnets, &net.private_subnets)?;
        validate_private_egress(net.nat_mode != NatMode::Disabled, net.enable_vpc_endpoints)?;

        // compute service is always one peer
        validate_peer_cap(self.cache.extra_peer_security_groups.len() + 1, MAX_PEERS)?;

        let compute = &self.compute;
        validate_task_shape(compute.cpu, compute.memory)?;
        validate_log_retention(compute.log_retention_days)?;
        if let Toggle::Enabled(scaling) = &compute.autoscaling {
            validate_scaling_bounds(scaling.min_capacity, scaling.max_capacity, compute.desired_count)?;
            validate_target_utilization(scaling.cpu_target_percent)?;
            validate_target_utilization(scaling.memory_target_percent)?;
        } else if compute.desired_count == 0 {
            return Err(ValidationError::invalid("compute.desired_count", "must be at least 1").into());
        }
        for (variable, field) in &compute.secret_environment {
            self.require_field(variable, field)?;
        }

        validate_webhook_path(&self.ingress.webhook_path)?;
        validate_log_retention(self.ingress.access_log_retention_days)?;
        if let Toggle::Enabled(authorizer) = &self.ingress.authorizer {
            self.require_field("ingress.authorizer.secret_field", &authorizer.secret_field)?;
        }
        if let Toggle::Enabled(domain) = &self.ingress.custom_domain {
            if !domain.domain_name.is_within(&domain.hosted_zone_name) {
                return Err(ValidationError::DomainOutsideZone {
                    domain: domain.domain_name.to_string(),
                    zone: domain.hosted_zone_name.clone(),
                }
                .into());
            }
        }

        for key in self.sensitive.keys() {
            SecretField::new(key.as_str()).map_err(ValidationError::from)?;
        }
        if self.sensitive.is_empty() {
            return Err(ValidationError::invalid("sensitive", "credential bundle needs at least one field").into());
        }

        Ok(())
    }

    fn require_field(&self, variable: &str, field: &SecretField) -> TopologyResult<()> {
        if self.sensitive.get(field.as_str()).is_none() {
            return Err(ValidationError::UnknownSecretField {
                variable: variable.to_string(),
                field: field.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_one() -> u32 {
    1
}

fn default_max_images() -> u32 {
    30
}

fn default_engine_version() -> String {
    "7.1".to_string()
}

fn default_parameter_family() -> String {
    "redis7".to_string()
}

fn default_cache_port() -> Port {
    Port::REDIS
}

fn default_snapshot_retention() -> u32 {
    7
}

fn default_image_tag() -> String {
    "latest".to_string()
}

fn default_grace_period() -> u32 {
    60
}

fn default_log_retention() -> u32 {
    30
}

fn default_signature_header() -> String {
    DEFAULT_SIGNATURE_HEADER.to_string()
}
