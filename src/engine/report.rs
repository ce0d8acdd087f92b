// Copyright (c) 2025 - Cowboy AI, Inc.
//! Evaluation results

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::EnvironmentName;
use crate::graph::NodeAddress;
use crate::plan::{ActionKind, PlanSummary};

/// A provider call that succeeded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedAction {
    pub address: NodeAddress,
    #[serde(flatten)]
    pub kind: ActionKind,
}

/// A provider call that was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAction {
    pub address: NodeAddress,
    #[serde(flatten)]
    pub kind: ActionKind,
    pub error: String,
}

/// Outcome of one apply or destroy run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub environment: EnvironmentName,
    /// Serial of the record after the run
    pub serial: u64,
    pub applied: Vec<AppliedAction>,
    pub failed: Vec<FailedAction>,
    /// Actions not attempted because an upstream action failed
    pub skipped: Vec<NodeAddress>,
    /// Root outputs resolved after the run
    pub outputs: BTreeMap<String, Value>,
    /// Whether a new record was written
    pub persisted: bool,
}

impl ApplyReport {
    pub(crate) fn new(environment: EnvironmentName, serial: u64) -> Self {
        Self {
            environment,
            serial,
            applied: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            outputs: BTreeMap::new(),
            persisted: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    pub fn failure(&self, address: &NodeAddress) -> Option<&FailedAction> {
        self.failed.iter().find(|f| &f.address == address)
    }

    pub fn was_skipped(&self, address: &NodeAddress) -> bool {
        self.skipped.contains(address)
    }

    /// Counts of successful actions
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for action in &self.applied {
            match action.kind {
                ActionKind::Create => summary.create += 1,
                ActionKind::Update => summary.update += 1,
                ActionKind::Replace { .. } => summary.replace += 1,
                ActionKind::Delete => summary.delete += 1,
                ActionKind::NoOp => {}
            }
        }
        summary
    }
}

impl fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.summary();
        write!(
            f,
            "Environment '{}' at serial {}: {} created, {} updated, {} replaced, {} deleted",
            self.environment, self.serial, summary.create, summary.update, summary.replace, summary.delete
        )?;
        if !self.failed.is_empty() || !self.skipped.is_empty() {
            write!(f, "; {} failed, {} skipped", self.failed.len(), self.skipped.len())?;
        }
        Ok(())
    }
}
