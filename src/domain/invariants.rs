// Copyright (c) 2025 - Cowboy AI, Inc.
//! Pure Validation Functions - Contract Invariants
//!
//! Every check here runs before any node is emitted. A failure is a
//! contract violation: fatal, reported with context, and no partial graph is
//! ever attempted.
//!
//! # Invariant Categories
//!
//! 1. **Structural Invariants**: list lengths, enumerations, ranges
//! 2. **Address Invariants**: subnet containment and disjointness
//! 3. **Scope Invariants**: access statements never carry wildcards
//! 4. **Sizing Invariants**: runtime shapes and scaling bounds

use std::collections::BTreeSet;

use super::arn::ArnError;
use super::environment::EnvironmentError;
use super::hostname::DomainNameError;
use super::network::{Ipv4Cidr, NetworkError};

/// Validation result with detailed error information
pub type ValidationResult = Result<(), ValidationError>;

/// Validation error with context
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("At least one availability zone is required")]
    NoZones,

    #[error("Zone/subnet count mismatch: {zones} zones, {public} public and {private} private subnet blocks")]
    ZoneCountMismatch {
        zones: usize,
        public: usize,
        private: usize,
    },

    #[error("Availability zone listed twice: {0}")]
    DuplicateZone(String),

    #[error("Subnet {subnet} is not contained in base block {block}")]
    SubnetOutsideBlock { subnet: Ipv4Cidr, block: Ipv4Cidr },

    #[error("Subnet blocks overlap: {first} and {second}")]
    SubnetOverlap { first: Ipv4Cidr, second: Ipv4Cidr },

    #[error("Private subnets have no egress: NAT is disabled and service endpoints are off")]
    NoPrivateEgress,

    #[error("Invalid region name: {0}")]
    InvalidRegion(String),

    #[error("Too many peers allowed to reach the cache: {count} (maximum {max})")]
    TooManyPeers { count: usize, max: usize },

    #[error("Invalid scaling bounds: min {min}, max {max}, desired {desired}")]
    InvalidScalingBounds { min: u32, max: u32, desired: u32 },

    #[error("Target utilization must be 1-100 percent: {0}")]
    InvalidTargetUtilization(u32),

    #[error("Unsupported runtime shape: {cpu} CPU units with {memory} MiB")]
    InvalidTaskShape { cpu: u32, memory: u32 },

    #[error("Unsupported log retention: {0} days")]
    InvalidLogRetention(u32),

    #[error("Webhook path must start with '/' and contain only path characters: {0}")]
    InvalidWebhookPath(String),

    #[error("Custom domain {domain} is not inside hosted zone {zone}")]
    DomainOutsideZone { domain: String, zone: String },

    #[error("Container secret {variable} references unknown bundle field {field}")]
    UnknownSecretField { variable: String, field: String },

    #[error("Wildcard resource in scoped access list: {0}")]
    WildcardResource(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("ARN error: {0}")]
    Arn(#[from] ArnError),

    #[error("Environment error: {0}")]
    Environment(#[from] EnvironmentError),

    #[error("Domain name error: {0}")]
    DomainName(#[from] DomainNameError),
}

impl ValidationError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Retention periods accepted by the log service
pub const LOG_RETENTION_DAYS: &[u32] = &[
    1, 3, 5, 7, 14, 30, 60, 90, 120, 150, 180, 365, 400, 545, 731, 1096, 1827, 2192, 2557, 2922,
    3288, 3653,
];

/// Validate zone and subnet block lists are zone-aligned
///
/// # Rules
/// - At least one zone
/// - No zone listed twice
/// - One public and one private block per zone
pub fn validate_zone_alignment(
    zones: &[String],
    public: &[Ipv4Cidr],
    private: &[Ipv4Cidr],
) -> ValidationResult {
    if zones.is_empty() {
        return Err(ValidationError::NoZones);
    }

    let mut seen = BTreeSet::new();
    for zone in zones {
        if !seen.insert(zone.as_str()) {
            return Err(ValidationError::DuplicateZone(zone.clone()));
        }
    }

    if public.len() != zones.len() || private.len() != zones.len() {
        return Err(ValidationError::ZoneCountMismatch {
            zones: zones.len(),
            public: public.len(),
            private: private.len(),
        });
    }

    Ok(())
}

/// Validate subnet blocks against the base address block
///
/// # Rules
/// - Every subnet is contained in the base block
/// - No two subnets (across both tiers) overlap
pub fn validate_subnet_layout(
    base: &Ipv4Cidr,
    public: &[Ipv4Cidr],
    private: &[Ipv4Cidr],
) -> ValidationResult {
    let all: Vec<&Ipv4Cidr> = public.iter().chain(private.iter()).collect();

    for subnet in &all {
        if !base.contains(subnet) {
            return Err(ValidationError::SubnetOutsideBlock {
                subnet: **subnet,
                block: *base,
            });
        }
    }

    for (i, first) in all.iter().enumerate() {
        for second in all.iter().skip(i + 1) {
            if first.overlaps(second) {
                return Err(ValidationError::SubnetOverlap {
                    first: **first,
                    second: **second,
                });
            }
        }
    }

    Ok(())
}

/// Validate the private tier can reach the registry, logs, and secret store
///
/// # Rules
/// - Without NAT egress, service endpoints must be enabled
pub fn validate_private_egress(nat_enabled: bool, endpoints_enabled: bool) -> ValidationResult {
    if !nat_enabled && !endpoints_enabled {
        return Err(ValidationError::NoPrivateEgress);
    }
    Ok(())
}

/// Validate a region name such as `ap-northeast-1` or `us-gov-west-1`
///
/// # Rules
/// - At least three `-`-separated parts
/// - First part is two lowercase letters
/// - Middle parts are lowercase letters
/// - Last part is digits
pub fn validate_region(region: &str) -> ValidationResult {
    let parts: Vec<&str> = region.split('-').collect();
    let well_formed = parts.len() >= 3
        && parts[0].len() == 2
        && parts[..parts.len() - 1]
            .iter()
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_lowercase()))
        && parts[parts.len() - 1]
            .chars()
            .all(|c| c.is_ascii_digit())
        && !parts[parts.len() - 1].is_empty();

    if !well_formed {
        return Err(ValidationError::InvalidRegion(region.to_string()));
    }
    Ok(())
}

/// Validate the peer allow-list stays within its cap
pub fn validate_peer_cap(count: usize, max: usize) -> ValidationResult {
    if count > max {
        return Err(ValidationError::TooManyPeers { count, max });
    }
    Ok(())
}

/// Validate autoscaling bounds
///
/// # Rules
/// - `1 <= min <= desired <= max`
pub fn validate_scaling_bounds(min: u32, max: u32, desired: u32) -> ValidationResult {
    if min == 0 || min > max || desired < min || desired > max {
        return Err(ValidationError::InvalidScalingBounds { min, max, desired });
    }
    Ok(())
}

/// Validate a target-tracking utilization percentage
pub fn validate_target_utilization(percent: u32) -> ValidationResult {
    if percent == 0 || percent > 100 {
        return Err(ValidationError::InvalidTargetUtilization(percent));
    }
    Ok(())
}

/// Validate a serverless container runtime shape
///
/// # Rules
/// - 256 CPU: 512, 1024, 2048 MiB
/// - 512 CPU: 1024-4096 MiB in 1024 steps
/// - 1024 CPU: 2048-8192 MiB in 1024 steps
/// - 2048 CPU: 4096-16384 MiB in 1024 steps
/// - 4096 CPU: 8192-30720 MiB in 1024 steps
pub fn validate_task_shape(cpu: u32, memory: u32) -> ValidationResult {
    let valid = match cpu {
        256 => matches!(memory, 512 | 1024 | 2048),
        512 => (1024..=4096).contains(&memory) && memory % 1024 == 0,
        1024 => (2048..=8192).contains(&memory) && memory % 1024 == 0,
        2048 => (4096..=16384).contains(&memory) && memory % 1024 == 0,
        4096 => (8192..=30720).contains(&memory) && memory % 1024 == 0,
        _ => false,
    };

    if !valid {
        return Err(ValidationError::InvalidTaskShape { cpu, memory });
    }
    Ok(())
}

/// Validate a log retention period
pub fn validate_log_retention(days: u32) -> ValidationResult {
    if !LOG_RETENTION_DAYS.contains(&days) {
        return Err(ValidationError::InvalidLogRetention(days));
    }
    Ok(())
}

/// Validate the exposed webhook path
///
/// # Rules
/// - Starts with `/`
/// - Not just `/`
/// - Segments contain only `[A-Za-z0-9._-]`
pub fn validate_webhook_path(path: &str) -> ValidationResult {
    let well_formed = path.len() > 1
        && path.starts_with('/')
        && path[1..].split('/').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        });

    if !well_formed {
        return Err(ValidationError::InvalidWebhookPath(path.to_string()));
    }
    Ok(())
}

/// Validate a scoped resource list contains no wildcard
pub fn validate_no_wildcards<'a>(resources: impl IntoIterator<Item = &'a str>) -> ValidationResult {
    for resource in resources {
        if resource.contains('*') {
            return Err(ValidationError::WildcardResource(resource.to_string()));
        }
    }
    Ok(())
}
