// Copyright (c) 2025 - Cowboy AI, Inc.
//! State Backends
//!
//! This module defines the storage interface for environment state records
//! and the exclusive lock that serializes evaluations.
//!
//! # Architecture
//!
//! ```text
//! Evaluator ──lock──> StateBackend ──load──> StateRecord
//!     │                                        │
//!     └──apply──> Provider ──outputs──> persist(expected serial)
//!                                              │
//!                                           unlock
//! ```
//!
//! # Backend Requirements
//!
//! 1. **Exclusive**: at most one evaluation per environment holds the lock
//! 2. **Fail fast**: a held lock is reported immediately, never waited on
//! 3. **Versioned**: every persist is checked against the expected serial
//! 4. **Durable**: records survive process restarts (file and NATS backends)

use async_trait::async_trait;

use crate::domain::EnvironmentName;
use crate::errors::TopologyResult;

pub mod file;
pub mod memory;
pub mod nats;
mod record;

pub use file::FileStateBackend;
pub use memory::MemoryStateBackend;
pub use nats::{NatsStateBackend, NatsStateConfig};
pub use record::{LockInfo, ResourceState, ResourceStatus, StateRecord};

/// Storage interface for environment state
///
/// Implementations must ensure:
///
/// - **Atomic lock acquisition**: `lock` either creates the lock entry or
///   reports the current holder, with no window where two callers succeed
/// - **Optimistic concurrency**: `persist` rejects a record whose serial
///   does not follow the stored one
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Backend name used in logs
    fn name(&self) -> &'static str;

    /// Load the current record, or `None` for a new environment
    async fn load(&self, environment: &EnvironmentName) -> TopologyResult<Option<StateRecord>>;

    /// Store a record
    ///
    /// The stored serial must equal `record.serial - 1`, or no record may
    /// exist when `record.serial == 1`.
    ///
    /// # Errors
    ///
    /// - `StateConflict` if another writer persisted in between
    async fn persist(&self, record: &StateRecord) -> TopologyResult<()>;

    /// Acquire the exclusive lock for an environment
    ///
    /// # Errors
    ///
    /// - `LockContention` if the lock is already held
    async fn lock(&self, info: &LockInfo) -> TopologyResult<()>;

    /// Release a lock previously acquired with the same id
    async fn unlock(&self, info: &LockInfo) -> TopologyResult<()>;

    /// Current lock holder, if any
    async fn lock_holder(&self, environment: &EnvironmentName) -> TopologyResult<Option<LockInfo>>;
}

/// Shared serial check for backends
pub(crate) fn check_serial(stored: Option<u64>, record: &StateRecord) -> TopologyResult<()> {
    let expected = record.serial.saturating_sub(1);
    let actual = stored.unwrap_or(0);
    if actual != expected || record.serial == 0 {
        return Err(crate::errors::TopologyError::StateConflict { expected, actual });
    }
    Ok(())
}
