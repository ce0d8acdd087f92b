// Copyright (c) 2025 - Cowboy AI, Inc.
//! Filesystem state backend
//!
//! Layout under the state directory:
//!
//! ```text
//! <dir>/<environment>/state.json        current record
//! <dir>/<environment>/history/<n>.json  every persisted serial
//! <dir>/<environment>/lock.json         present while a run holds the lock
//! ```
//!
//! The lock file is created with `create_new`, so acquisition is atomic on
//! local filesystems.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{check_serial, LockInfo, StateBackend, StateRecord};
use crate::domain::EnvironmentName;
use crate::errors::{TopologyError, TopologyResult};

const STATE_FILE: &str = "state.json";
const LOCK_FILE: &str = "lock.json";
const HISTORY_DIR: &str = "history";

/// State records as JSON files
#[derive(Debug, Clone)]
pub struct FileStateBackend {
    root: PathBuf,
}

impl FileStateBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn env_dir(&self, environment: &EnvironmentName) -> PathBuf {
        self.root.join(environment.as_str())
    }

    /// Serials kept in history, oldest first
    pub async fn history(&self, environment: &EnvironmentName) -> TopologyResult<Vec<u64>> {
        let dir = self.env_dir(environment).join(HISTORY_DIR);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut serials = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(serial) = name
                .to_str()
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|n| n.parse::<u64>().ok())
            {
                serials.push(serial);
            }
        }
        serials.sort_unstable();
        Ok(serials)
    }
}

#[async_trait]
impl StateBackend for FileStateBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn load(&self, environment: &EnvironmentName) -> TopologyResult<Option<StateRecord>> {
        let path = self.env_dir(environment).join(STATE_FILE);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(StateRecord::from_bytes(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, record: &StateRecord) -> TopologyResult<()> {
        let dir = self.env_dir(&record.environment);
        fs::create_dir_all(dir.join(HISTORY_DIR)).await?;

        let stored = self.load(&record.environment).await?.map(|r| r.serial);
        check_serial(stored, record)?;

        let bytes = record.to_bytes()?;
        let history = dir.join(HISTORY_DIR).join(format!("{}.json", record.serial));
        fs::write(&history, &bytes).await?;

        // Rename keeps the current record whole if the process dies mid-write
        let staging = dir.join(format!("{}.tmp", STATE_FILE));
        fs::write(&staging, &bytes).await?;
        fs::rename(&staging, dir.join(STATE_FILE)).await?;

        debug!(environment = %record.environment, serial = record.serial, "Persisted state file");
        Ok(())
    }

    async fn lock(&self, info: &LockInfo) -> TopologyResult<()> {
        let dir = self.env_dir(&info.environment);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(LOCK_FILE);

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = match self.lock_holder(&info.environment).await? {
                    Some(held) => held.holder,
                    None => "unknown".to_string(),
                };
                return Err(TopologyError::LockContention {
                    environment: info.environment.to_string(),
                    holder,
                });
            }
            Err(e) => return Err(e.into()),
        };

        file.write_all(&serde_json::to_vec(info)?).await?;
        file.flush().await?;
        info!(environment = %info.environment, holder = %info.holder, lock_id = %info.id, "Acquired state lock");
        Ok(())
    }

    async fn unlock(&self, info: &LockInfo) -> TopologyResult<()> {
        let path = self.env_dir(&info.environment).join(LOCK_FILE);
        match self.lock_holder(&info.environment).await? {
            Some(held) if held.id == info.id => {
                fs::remove_file(&path).await?;
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
        let path = self.env_dir(environment).join(LOCK_FILE);
        match fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn env() -> EnvironmentName {
        EnvironmentName::new("dev").unwrap()
    }

    #[tokio::test]
    async fn test_persist_and_load() {
        let dir = TempDir::new().unwrap();
        let backend = FileStateBackend::new(dir.path());
        assert!(backend.load(&env()).await.unwrap().is_none());

        let mut record = StateRecord::new(env());
        record.serial = 1;
        backend.persist(&record).await.unwrap();
        record.serial = 2;
        backend.persist(&record).await.unwrap();

        let loaded = backend.load(&env()).await.unwrap().unwrap();
        assert_eq!(loaded.serial, 2);
        assert_eq!(loaded.lineage, record.lineage);
        assert_eq!(backend.history(&env()).await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_lock_file_contention() {
        let dir = TempDir::new().unwrap();
        let backend = FileStateBackend::new(dir.path());
        let first = LockInfo::new(env(), "alice@laptop", "apply");
        let second = LockInfo::new(env(), "ci-runner", "plan");

        backend.lock(&first).await.unwrap();
        match backend.lock(&second).await {
            Err(TopologyError::LockContention { holder, .. }) => assert_eq!(holder, "alice@laptop"),
            other => panic!("expected contention, got {:?}", other),
        }

        // Only the holder can release
        assert!(backend.unlock(&second).await.is_err());
        backend.unlock(&first).await.unwrap();
        assert!(backend.lock_holder(&env()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_serial_rejected() {
        let dir = TempDir::new().unwrap();
        let backend = FileStateBackend::new(dir.path());
        let mut record = StateRecord::new(env());
        record.serial = 1;
        backend.persist(&record).await.unwrap();

        assert!(matches!(
            backend.persist(&record).await,
            Err(TopologyError::StateConflict { .. })
        ));
    }
}
