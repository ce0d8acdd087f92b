// Copyright (c) 2025 - Cowboy AI, Inc.
//! Node Apply Lifecycle
//!
//! Tracks one planned action through an evaluation.
//!
//! # States
//!
//! - Planned: waiting on upstream actions
//! - Applying: provider call in flight
//! - Applied: provider call succeeded (terminal)
//! - Failed: provider rejected the call (terminal)
//! - Skipped: an upstream action failed or was skipped (terminal)
//!
//! # Inputs
//!
//! - Start: Planned → Applying
//! - Succeed: Applying → Applied
//! - Fail: Applying → Failed
//! - UpstreamFailed: Planned → Skipped

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{StateMachine, TransitionError, TransitionResult};

/// Phase of one node during an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodePhase {
    Planned,
    Applying,
    Applied,
    Failed,
    Skipped,
}

impl NodePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Applied | Self::Failed | Self::Skipped)
    }

    /// Whether downstream actions may proceed
    pub fn unblocks_dependents(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

impl fmt::Display for NodePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Planned => "planned",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Lifecycle input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    Start,
    Succeed,
    Fail,
    UpstreamFailed,
}

/// Transition output
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PhaseChange {
    /// Dependents must be skipped
    pub blocks_dependents: bool,
}

impl StateMachine for NodePhase {
    type Input = NodeEvent;
    type Output = PhaseChange;

    fn transition(&self, input: &Self::Input) -> TransitionResult<(Self, Self::Output)> {
        use NodeEvent::*;
        use NodePhase::*;

        match (self, input) {
            (Planned, Start) => Ok((Applying, PhaseChange::default())),
            (Planned, UpstreamFailed) => Ok((
                Skipped,
                PhaseChange {
                    blocks_dependents: true,
                },
            )),
            (Applying, Succeed) => Ok((Applied, PhaseChange::default())),
            (Applying, Fail) => Ok((
                Failed,
                PhaseChange {
                    blocks_dependents: true,
                },
            )),
            (state, _) if state.is_terminal() => Err(TransitionError::Terminal(state.to_string())),
            (from, input) => Err(TransitionError::InvalidTransition {
                from: from.to_string(),
                to: format!("{:?}", input),
            }),
        }
    }

    fn valid_inputs(&self) -> Vec<Self::Input> {
        use NodeEvent::*;
        use NodePhase::*;

        match self {
            Planned => vec![Start, UpstreamFailed],
            Applying => vec![Succeed, Fail],
            Applied | Failed | Skipped => Vec::new(),
        }
    }
}
