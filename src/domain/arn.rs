// Copyright (c) 2025 - Cowboy AI, Inc.
//! Resource Name and Secret Reference Value Objects
//!
//! Access statements and credential placement both address resources by
//! ARN. A [`SecretReference`] pairs a credential bundle ARN with a field
//! selector and is the only form in which credentials leave the secret store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// ARN validation error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArnError {
    #[error("ARN is empty")]
    Empty,

    #[error("ARN must start with 'arn:': {0}")]
    MissingPrefix(String),

    #[error("ARN must have at least 6 colon-separated segments: {0}")]
    TooFewSegments(String),

    #[error("ARN service segment is empty: {0}")]
    MissingService(String),

    #[error("Wildcard resources are not allowed in scoped lists: {0}")]
    Wildcard(String),

    #[error("Secret field selector is invalid: {0}")]
    InvalidField(String),
}

/// Amazon Resource Name value object
///
/// `arn:partition:service:region:account-id:resource`
///
/// # Invariants
/// - Starts with `arn:`
/// - Six or more segments (the resource part may itself contain colons)
/// - Non-empty service segment
/// - No `*` anywhere (scoped lists never carry wildcards)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Arn(String);

impl Arn {
    pub fn new(arn: impl Into<String>) -> Result<Self, ArnError> {
        let arn = arn.into();

        if arn.is_empty() {
            return Err(ArnError::Empty);
        }
        if !arn.starts_with("arn:") {
            return Err(ArnError::MissingPrefix(arn));
        }
        if arn.contains('*') {
            return Err(ArnError::Wildcard(arn));
        }

        let segments: Vec<&str> = arn.splitn(6, ':').collect();
        if segments.len() < 6 {
            return Err(ArnError::TooFewSegments(arn));
        }
        if segments[2].is_empty() {
            return Err(ArnError::MissingService(arn));
        }

        Ok(Self(arn))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn segment(&self, index: usize) -> &str {
        self.0.splitn(6, ':').nth(index).unwrap_or_default()
    }

    pub fn partition(&self) -> &str {
        self.segment(1)
    }

    pub fn service(&self) -> &str {
        self.segment(2)
    }

    pub fn region(&self) -> &str {
        self.segment(3)
    }

    pub fn account(&self) -> &str {
        self.segment(4)
    }

    pub fn resource(&self) -> &str {
        self.segment(5)
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Arn {
    type Err = ArnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Arn {
    type Error = ArnError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Arn> for String {
    fn from(arn: Arn) -> Self {
        arn.0
    }
}

/// Credential field selector within a structured secret bundle
///
/// Field names are environment-variable shaped: `[A-Z0-9_]+`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecretField(String);

impl SecretField {
    pub fn new(field: impl Into<String>) -> Result<Self, ArnError> {
        let field = field.into();
        let valid = !field.is_empty()
            && field
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
            && !field.starts_with(|c: char| c.is_ascii_digit());
        if !valid {
            return Err(ArnError::InvalidField(field));
        }
        Ok(Self(field))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SecretField {
    type Error = ArnError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SecretField> for String {
    fn from(field: SecretField) -> Self {
        field.0
    }
}

/// Reference to one field of a credential bundle
///
/// Rendered in the orchestrator's `valueFrom` form:
/// `<bundle-arn>:<field>::` (JSON key, default stage, latest version).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretReference {
    pub bundle_arn: Arn,
    pub field: SecretField,
}

impl SecretReference {
    pub fn new(bundle_arn: Arn, field: SecretField) -> Self {
        Self { bundle_arn, field }
    }

    /// Orchestrator `valueFrom` selector
    pub fn value_from(&self) -> String {
        format!("{}:{}::", self.bundle_arn, self.field)
    }
}

impl fmt::Display for SecretReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value_from())
    }
}
