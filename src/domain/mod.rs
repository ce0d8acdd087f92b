// Copyright (c) 2025 - Cowboy AI, Inc.
//! Topology Domain Models
//!
//! Value objects with validation invariants used by every module builder.
//!
//! # Value Objects with Invariants
//!
//! - [`Ipv4Cidr`] - address blocks with containment and overlap checks
//! - [`Port`] - TCP service ports
//! - [`Arn`] - scoped resource names (wildcards rejected)
//! - [`SecretReference`] - credential-by-reference (bundle ARN + field)
//! - [`EnvironmentName`] / [`EnvironmentTier`] - deployment environment identity
//! - [`DomainName`] - RFC 1123 names for the custom API domain
//! - [`ResourceKind`] - node taxonomy
//!
//! Contract checks live in [`invariants`] as pure functions.

pub mod arn;
pub mod environment;
pub mod hostname;
pub mod invariants;
pub mod network;
pub mod resource_kind;

pub use arn::{Arn, ArnError, SecretField, SecretReference};
pub use environment::{EnvironmentError, EnvironmentName, EnvironmentTier};
pub use hostname::{DomainName, DomainNameError};
pub use invariants::{ValidationError, ValidationResult};
pub use network::{Ipv4Cidr, NetworkError, Port};
pub use resource_kind::{ResourceCategory, ResourceKind};
