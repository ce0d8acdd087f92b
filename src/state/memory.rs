// Copyright (c) 2025 - Cowboy AI, Inc.
//! In-memory state backend for tests and dry runs

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::debug;

use super::{check_serial, LockInfo, StateBackend, StateRecord};
use crate::domain::EnvironmentName;
use crate::errors::{TopologyError, TopologyResult};

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<EnvironmentName, StateRecord>,
    locks: BTreeMap<EnvironmentName, LockInfo>,
    persists: usize,
}

/// Process-local backend
#[derive(Debug, Default)]
pub struct MemoryStateBackend {
    inner: Mutex<Inner>,
}

impl MemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful persists
    pub async fn persist_count(&self) -> usize {
        self.inner.lock().await.persists
    }
}

#[async_trait]
impl StateBackend for MemoryStateBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, environment: &EnvironmentName) -> TopologyResult<Option<StateRecord>> {
        Ok(self.inner.lock().await.records.get(environment).cloned())
    }

    async fn persist(&self, record: &StateRecord) -> TopologyResult<()> {
        let mut inner = self.inner.lock().await;
        let stored = inner.records.get(&record.environment).map(|r| r.serial);
        check_serial(stored, record)?;
        inner.records.insert(record.environment.clone(), record.clone());
        inner.persists += 1;
        debug!(environment = %record.environment, serial = record.serial, "Persisted state");
        Ok(())
    }

    async fn lock(&self, info: &LockInfo) -> TopologyResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(held) = inner.locks.get(&info.environment) {
            return Err(TopologyError::LockContention {
                environment: info.environment.to_string(),
                holder: held.holder.clone(),
            });
        }
        inner.locks.insert(info.environment.clone(), info.clone());
        Ok(())
    }

    async fn unlock(&self, info: &LockInfo) -> TopologyResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.locks.get(&info.environment) {
            Some(held) if held.id == info.id => {
                inner.locks.remove(&info.environment);
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
        Ok(self.inner.lock().await.locks.get(environment).cloned())
    }
}
