// Copyright (c) 2025 - Cowboy AI, Inc.
//! Domain Name Value Object with DNS Validation Invariants

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Domain name validation error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainNameError {
    #[error("Domain name is empty")]
    Empty,

    #[error("Domain name exceeds maximum length of 253 characters: {0}")]
    TooLong(usize),

    #[error("Label exceeds maximum length of 63 characters: {0}")]
    LabelTooLong(String),

    #[error("Invalid character in domain name: {0}")]
    InvalidCharacter(char),

    #[error("Label cannot start or end with hyphen: {0}")]
    InvalidLabelFormat(String),

    #[error("Top-level label cannot be all numeric: {0}")]
    NumericTld(String),

    #[error("Custom domain must have at least two labels: {0}")]
    NotQualified(String),
}

/// Fully qualified domain name for the custom API domain
///
/// RFC 1123 rules, lowercased on construction:
/// - Total length ≤ 253 characters
/// - Each label 1-63 characters of `[a-z0-9-]`, no leading/trailing hyphen
/// - Top-level label not all numeric
/// - At least two labels
///
/// # Examples
///
/// ```rust
/// use webhook_topology::domain::DomainName;
///
/// let name = DomainName::new("Hooks.Example.com").unwrap();
/// assert_eq!(name.as_str(), "hooks.example.com");
/// assert!(name.is_within("example.com"));
/// assert!(DomainName::new("localhost").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DomainName(String);

impl DomainName {
    pub const MAX_LENGTH: usize = 253;
    pub const MAX_LABEL_LENGTH: usize = 63;

    pub fn new(name: impl Into<String>) -> Result<Self, DomainNameError> {
        let name = name.into().trim_end_matches('.').to_ascii_lowercase();

        if name.is_empty() {
            return Err(DomainNameError::Empty);
        }
        if name.len() > Self::MAX_LENGTH {
            return Err(DomainNameError::TooLong(name.len()));
        }

        let labels: Vec<&str> = name.split('.').collect();
        if labels.len() < 2 {
            return Err(DomainNameError::NotQualified(name));
        }
        for label in &labels {
            Self::validate_label(label)?;
        }
        if let Some(tld) = labels.last() {
            if tld.chars().all(|c| c.is_ascii_digit()) {
                return Err(DomainNameError::NumericTld(tld.to_string()));
            }
        }

        Ok(Self(name))
    }

    fn validate_label(label: &str) -> Result<(), DomainNameError> {
        if label.is_empty() {
            return Err(DomainNameError::Empty);
        }
        if label.len() > Self::MAX_LABEL_LENGTH {
            return Err(DomainNameError::LabelTooLong(label.to_string()));
        }
        if let Some(ch) = label
            .chars()
            .find(|ch| !ch.is_ascii_alphanumeric() && *ch != '-')
        {
            return Err(DomainNameError::InvalidCharacter(ch));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(DomainNameError::InvalidLabelFormat(label.to_string()));
        }
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this name equals or is a subdomain of `zone`
    pub fn is_within(&self, zone: &str) -> bool {
        let zone = zone.trim_end_matches('.').to_ascii_lowercase();
        self.0 == zone || self.0.ends_with(&format!(".{}", zone))
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DomainName {
    type Error = DomainNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DomainName> for String {
    fn from(name: DomainName) -> Self {
        name.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_domain_names() {
        assert!(DomainName::new("webhook.example.com").is_ok());
        assert!(DomainName::new("a-b.example.co.jp").is_ok());
        assert_eq!(
            DomainName::new("api.example.com.").unwrap().as_str(),
            "api.example.com"
        );
    }

    #[test]
    fn test_invalid_domain_names() {
        assert_eq!(DomainName::new(""), Err(DomainNameError::Empty));
        assert!(matches!(
            DomainName::new("localhost"),
            Err(DomainNameError::NotQualified(_))
        ));
        assert!(matches!(
            DomainName::new("-bad.example.com"),
            Err(DomainNameError::InvalidLabelFormat(_))
        ));
        assert!(matches!(
            DomainName::new("under_score.example.com"),
            Err(DomainNameError::InvalidCharacter('_'))
        ));
        assert!(matches!(
            DomainName::new("example.123"),
            Err(DomainNameError::NumericTld(_))
        ));
        assert!(matches!(
            DomainName::new("a..example.com"),
            Err(DomainNameError::Empty)
        ));
    }

    #[test]
    fn test_label_too_long() {
        let label = "a".repeat(64);
        assert!(matches!(
            DomainName::new(format!("{}.example.com", label)),
            Err(DomainNameError::LabelTooLong(_))
        ));
    }

    #[test]
    fn test_is_within_zone() {
        let name = DomainName::new("hooks.example.com").unwrap();
        assert!(name.is_within("example.com"));
        assert!(name.is_within("hooks.example.com"));
        assert!(!name.is_within("ample.com"));
        assert!(!name.is_within("other.com"));
    }
}
