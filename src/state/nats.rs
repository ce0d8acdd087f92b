// Copyright (c) 2025 - Cowboy AI, Inc.
//! NATS JetStream state backend
//!
//! Two key-value buckets back the state layer:
//!
//! - **state bucket**: one key per environment holding the current record,
//!   with bucket history so earlier serials stay recoverable
//! - **lock bucket**: one key per environment, claimed with a revision
//!   expectation so only one writer can take a vacant key
//!
//! # Example
//!
//! ```rust,no_run
//! use webhook_topology::state::{NatsStateBackend, NatsStateConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = NatsStateBackend::connect(NatsStateConfig::default()).await?;
//!     // Hand the backend to an Evaluator...
//!     Ok(())
//! }
//! ```

use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{check_serial, LockInfo, StateBackend, StateRecord};
use crate::domain::EnvironmentName;
use crate::errors::{TopologyError, TopologyResult};

/// Connection and bucket settings
#[derive(Debug, Clone)]
pub struct NatsStateConfig {
    /// NATS server URL (e.g., "nats://localhost:4222")
    pub url: String,

    /// Bucket holding state records
    pub state_bucket: String,

    /// Bucket holding environment locks
    pub lock_bucket: String,

    /// Record revisions kept per environment
    pub history: i64,
}

impl Default for NatsStateConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            state_bucket: "TOPOLOGY_STATE".to_string(),
            lock_bucket: "TOPOLOGY_LOCKS".to_string(),
            history: 64,
        }
    }
}

/// JetStream key-value backed state
pub struct NatsStateBackend {
    state: kv::Store,
    locks: kv::Store,
}

impl NatsStateBackend {
    /// Connect and create or open both buckets
    pub async fn connect(config: NatsStateConfig) -> TopologyResult<Self> {
        let client = async_nats::connect(config.url.as_str())
            .await
            .map_err(|e| TopologyError::Nats(e.to_string()))?;
        info!(url = %config.url, "Connected to NATS for state");

        let jetstream = jetstream::new(client);
        let state = open_bucket(&jetstream, &config.state_bucket, config.history).await?;
        let locks = open_bucket(&jetstream, &config.lock_bucket, 1).await?;

        Ok(Self { state, locks })
    }
}

async fn open_bucket(
    jetstream: &jetstream::Context,
    bucket: &str,
    history: i64,
) -> TopologyResult<kv::Store> {
    if let Ok(store) = jetstream.get_key_value(bucket).await {
        return Ok(store);
    }

    debug!(bucket, history, "Creating key-value bucket");
    jetstream
        .create_key_value(kv::Config {
            bucket: bucket.to_string(),
            history,
            ..Default::default()
        })
        .await
        .map_err(|e| TopologyError::Nats(e.to_string()))
}

/// Revision a claim on a vacant key must expect, or `None` while a live value holds it
///
/// A key never written expects revision 0. A deleted or purged key keeps a
/// marker, so the claim expects the marker's revision instead.
fn vacant_revision(latest: Option<(u64, &kv::Operation)>) -> Option<u64> {
    match latest {
        None => Some(0),
        Some((revision, kv::Operation::Delete | kv::Operation::Purge)) => Some(revision),
        Some((_, kv::Operation::Put)) => None,
    }
}

/// Write `payload` only if no live value holds `key`
///
/// Returns `false` when another writer holds the key or claimed it first.
async fn create_if_absent(store: &kv::Store, key: &str, payload: Vec<u8>) -> TopologyResult<bool> {
    if store.update(key, payload.clone().into(), 0).await.is_ok() {
        return Ok(true);
    }

    let latest = store
        .entry(key)
        .await
        .map_err(|e| TopologyError::Nats(e.to_string()))?;
    match vacant_revision(latest.as_ref().map(|entry| (entry.revision, &entry.operation))) {
        Some(revision) if revision > 0 => Ok(store.update(key, payload.into(), revision).await.is_ok()),
        _ => Ok(false),
    }
}

#[async_trait]
impl StateBackend for NatsStateBackend {
    fn name(&self) -> &'static str {
        "nats"
    }

    async fn load(&self, environment: &EnvironmentName) -> TopologyResult<Option<StateRecord>> {
        let value = self
            .state
            .get(environment.as_str())
            .await
            .map_err(|e| TopologyError::Nats(e.to_string()))?;

        match value {
            Some(bytes) => Ok(Some(StateRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn persist(&self, record: &StateRecord) -> TopologyResult<()> {
        let key = record.environment.as_str();
        let entry = self
            .state
            .entry(key)
            .await
            .map_err(|e| TopologyError::Nats(e.to_string()))?
            .filter(|entry| matches!(entry.operation, kv::Operation::Put));

        let payload = record.to_bytes()?;
        match entry {
            Some(entry) => {
                let stored = StateRecord::from_bytes(&entry.value)?;
                check_serial(Some(stored.serial), record)?;
                // Revision check closes the window between read and write
                self.state
                    .update(key, payload.into(), entry.revision)
                    .await
                    .map_err(|e| {
                        warn!(environment = %record.environment, error = %e, "State revision moved");
                        TopologyError::StateConflict {
                            expected: record.serial.saturating_sub(1),
                            actual: stored.serial,
                        }
                    })?;
            }
            None => {
                check_serial(None, record)?;
                if !create_if_absent(&self.state, key, payload).await? {
                    warn!(environment = %record.environment, "State record appeared during persist");
                    return Err(TopologyError::StateConflict {
                        expected: record.serial.saturating_sub(1),
                        actual: record.serial,
                    });
                }
            }
        }

        debug!(environment = %record.environment, serial = record.serial, "Persisted state to NATS");
        Ok(())
    }

    async fn lock(&self, info: &LockInfo) -> TopologyResult<()> {
        let payload = serde_json::to_vec(info)?;
        if create_if_absent(&self.locks, info.environment.as_str(), payload).await? {
            info!(environment = %info.environment, holder = %info.holder, lock_id = %info.id, "Acquired state lock");
            return Ok(());
        }

        let holder = self
            .lock_holder(&info.environment)
            .await?
            .map(|held| held.holder)
            .unwrap_or_else(|| "unknown".to_string());
        Err(TopologyError::LockContention {
            environment: info.environment.to_string(),
            holder,
        })
    }

    async fn unlock(&self, info: &LockInfo) -> TopologyResult<()> {
        match self.lock_holder(&info.environment).await? {
            Some(held) if held.id == info.id => {
                self.locks
                    .delete(info.environment.as_str())
                    .await
                    .map_err(|e| TopologyError::Nats(e.to_string()))?;
                info!(environment = %info.environment, lock_id = %info.id, "Released state lock");
                Ok(())
            }
            Some(held) => Err(TopologyError::State(format!(
                "lock for {} is held by {} ({}), not {}",
                info.environment, held.holder, held.id, info.id
            ))),
            None => Ok(()),
        }
    }

    async fn lock_holder(&self, environment: &EnvironmentName) -> TopologyResult<Option<LockInfo>> {
        let value = self
            .locks
            .get(environment.as_str())
            .await
            .map_err(|e| TopologyError::Nats(e.to_string()))?;

        match value {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
