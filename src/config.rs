// Copyright (c) 2025 - Cowboy AI, Inc.
//! State backend configuration
//!
//! Selected from the environment:
//!
//! | Variable | Default |
//! |---|---|
//! | `TOPOLOGY_STATE_BACKEND` | `file` (`file` or `nats`) |
//! | `TOPOLOGY_STATE_DIR` | `.topology` |
//! | `NATS_URL` | `nats://localhost:4222` |
//! | `TOPOLOGY_STATE_BUCKET` | `TOPOLOGY_STATE` |
//! | `TOPOLOGY_LOCK_BUCKET` | `TOPOLOGY_LOCKS` |

use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::errors::{TopologyError, TopologyResult};
use crate::state::{FileStateBackend, NatsStateBackend, NatsStateConfig, StateBackend};

pub const DEFAULT_STATE_DIR: &str = ".topology";

/// Where state records and locks live
#[derive(Debug, Clone)]
pub enum BackendConfig {
    File { root: PathBuf },
    Nats(NatsStateConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::File {
            root: PathBuf::from(DEFAULT_STATE_DIR),
        }
    }
}

impl BackendConfig {
    /// Read backend selection from process environment variables
    pub fn from_env() -> TopologyResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read backend selection through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> TopologyResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let kind = lookup("TOPOLOGY_STATE_BACKEND").unwrap_or_else(|| "file".to_string());
        match kind.as_str() {
            "file" => Ok(Self::File {
                root: lookup("TOPOLOGY_STATE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR)),
            }),
            "nats" => {
                let defaults = NatsStateConfig::default();
                Ok(Self::Nats(NatsStateConfig {
                    url: lookup("NATS_URL").unwrap_or(defaults.url),
                    state_bucket: lookup("TOPOLOGY_STATE_BUCKET").unwrap_or(defaults.state_bucket),
                    lock_bucket: lookup("TOPOLOGY_LOCK_BUCKET").unwrap_or(defaults.lock_bucket),
                    history: defaults.history,
                }))
            }
            other => Err(TopologyError::Configuration(format!(
                "TOPOLOGY_STATE_BACKEND must be 'file' or 'nats', got '{}'",
                other
            ))),
        }
    }

    /// Open the configured backend
    pub async fn open(&self) -> TopologyResult<Arc<dyn StateBackend>> {
        match self {
            Self::File { root } => {
                info!(root = %root.display(), "Using file state backend");
                Ok(Arc::new(FileStateBackend::new(root.clone())))
            }
            Self::Nats(config) => {
                let backend = NatsStateBackend::connect(config.clone()).await?;
                Ok(Arc::new(backend))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_to_file_backend() {
        let config = BackendConfig::from_lookup(lookup(&[])).unwrap();
        assert!(matches!(config, BackendConfig::File { root } if root == PathBuf::from(".topology")));
    }

    #[test]
    fn test_nats_backend_from_env() {
        let config = BackendConfig::from_lookup(lookup(&[
            ("TOPOLOGY_STATE_BACKEND", "nats"),
            ("NATS_URL", "nats://10.0.0.5:4222"),
            ("TOPOLOGY_LOCK_BUCKET", "LOCKS_DEV"),
        ]))
        .unwrap();

        match config {
            BackendConfig::Nats(nats) => {
                assert_eq!(nats.url, "nats://10.0.0.5:4222");
                assert_eq!(nats.state_bucket, "TOPOLOGY_STATE");
                assert_eq!(nats.lock_bucket, "LOCKS_DEV");
            }
            other => panic!("expected nats backend, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let result = BackendConfig::from_lookup(lookup(&[("TOPOLOGY_STATE_BACKEND", "s3")]));
        assert!(matches!(result, Err(TopologyError::Configuration(_))));
    }
}
