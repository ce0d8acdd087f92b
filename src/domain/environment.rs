// Copyright (c) 2025 - Cowboy AI, Inc.
//! Deployment Environment Value Objects

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Environment validation error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvironmentError {
    #[error("Environment name is empty")]
    Empty,

    #[error("Environment name exceeds 16 characters: {0}")]
    TooLong(String),

    #[error("Environment name must be lowercase alphanumeric with hyphens: {0}")]
    InvalidName(String),

    #[error("Unknown environment tier: {0}")]
    UnknownTier(String),
}

/// Environment name (`dev`, `staging`, `production`, `qa-2`, ...)
///
/// Used as the state record key, the lock key, and the suffix of every
/// provisioned resource name, so it is restricted to a DNS-label-safe form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EnvironmentName(String);

impl EnvironmentName {
    pub const MAX_LENGTH: usize = 16;

    pub fn new(name: impl Into<String>) -> Result<Self, EnvironmentError> {
        let name = name.into();

        if name.is_empty() {
            return Err(EnvironmentError::Empty);
        }
        if name.len() > Self::MAX_LENGTH {
            return Err(EnvironmentError::TooLong(name));
        }
        let valid_chars = name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !valid_chars || name.starts_with('-') || name.ends_with('-') {
            return Err(EnvironmentError::InvalidName(name));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnvironmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EnvironmentName {
    type Err = EnvironmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for EnvironmentName {
    type Error = EnvironmentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EnvironmentName> for String {
    fn from(name: EnvironmentName) -> Self {
        name.0
    }
}

/// Trust tier of an environment
///
/// Policy-specific defaults (backup retention, deletion windows) key off the
/// tier rather than the environment name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentTier {
    Development,
    Staging,
    Production,
}

impl EnvironmentTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    /// Whether this is the highest-trust tier
    pub fn is_highest_trust(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Recovery window for deleted credential bundles
    pub fn secret_recovery_window_days(&self) -> u32 {
        match self {
            Self::Development => 0,
            Self::Staging => 7,
            Self::Production => 30,
        }
    }
}

impl fmt::Display for EnvironmentTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvironmentTier {
    type Err = EnvironmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Development),
            "stg" | "staging" => Ok(Self::Staging),
            "prod" | "production" => Ok(Self::Production),
            other => Err(EnvironmentError::UnknownTier(other.to_string())),
        }
    }
}
