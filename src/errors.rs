//! Error types for topology operations

use thiserror::Error;

use crate::domain::ValidationError;
use crate::graph::{GraphError, NodeAddress, ResolveError};

/// Errors that can occur while composing, planning, or applying a topology
#[derive(Debug, Error)]
pub enum TopologyError {
    /// Input parameters violate a module contract
    #[error("Contract violation: {0}")]
    ContractViolation(#[from] ValidationError),

    /// The provider refused an operation on a node
    #[error("Provider rejected {address}: {reason}")]
    ProviderRejection { address: NodeAddress, reason: String },

    /// Another run holds the environment lock
    #[error("State for environment '{environment}' is locked by {holder}")]
    LockContention { environment: String, holder: String },

    /// Persisted state moved underneath this run
    #[error("State conflict: expected serial {expected}, found {actual}")]
    StateConflict { expected: u64, actual: u64 },

    /// The declared graph is malformed
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// An attribute could not be resolved against known outputs
    #[error("Resolution error at {address}: {source}")]
    Resolve {
        address: NodeAddress,
        #[source]
        source: ResolveError,
    },

    /// State backend failure
    #[error("State backend error: {0}")]
    State(String),

    /// NATS error
    #[error("NATS error: {0}")]
    Nats(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type for topology operations
pub type TopologyResult<T> = Result<T, TopologyError>;

impl TopologyError {
    /// Whether this failure leaves remote infrastructure untouched
    pub fn is_pre_apply(&self) -> bool {
        matches!(
            self,
            Self::ContractViolation(_)
                | Self::Graph(_)
                | Self::LockContention { .. }
                | Self::Configuration(_)
        )
    }
}

impl From<async_nats::Error> for TopologyError {
    fn from(err: async_nats::Error) -> Self {
        TopologyError::Nats(err.to_string())
    }
}

impl From<serde_json::Error> for TopologyError {
    fn from(err: serde_json::Error) -> Self {
        TopologyError::Serialization(err.to_string())
    }
}

impl From<crate::domain::NetworkError> for TopologyError {
    fn from(err: crate::domain::NetworkError) -> Self {
        TopologyError::ContractViolation(err.into())
    }
}
