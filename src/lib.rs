//! Declarative resource composition for the containerized webhook topology
//!
//! Parameterized infrastructure modules are wired into one dependency graph
//! per deployment environment. A planner diffs that graph against the
//! durable state record and an evaluator applies the delta through a
//! provider seam while holding the environment's exclusive lock.
//!
//! ```text
//! EnvironmentParameters ─compose─> ResourceGraph ─plan─> Plan ─apply─> StateRecord
//!                                                           │
//!                                                    Provider (create/update/delete/read)
//! ```

pub mod authorizer;
pub mod composition;
pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod graph;
pub mod modules;
pub mod pipeline;
pub mod plan;
pub mod provider;
pub mod state;
pub mod state_machine;

// Re-export commonly used types
pub use composition::{compose, compose_bootstrap, CompositionOutputs, EnvironmentParameters};
pub use engine::{ApplyReport, Evaluator};
pub use errors::{TopologyError, TopologyResult};
pub use graph::{NodeAddress, ResourceGraph, ResourceNode};
pub use plan::{Plan, PlannedAction};
pub use provider::{Provider, SimulatedProvider};
pub use state::{StateBackend, StateRecord};
