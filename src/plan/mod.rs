// Copyright (c) 2025 - Cowboy AI, Inc.
//! Planned Delta
//!
//! A [`Plan`] is the ordered set of actions that converges recorded state
//! onto the declared graph. Creates, updates, and replacements come first in
//! topological order; deletes follow, consumers before producers.
//!
//! # Action selection
//!
//! ```text
//! not in state                      → create
//! in state, tainted                 → replace
//! in state, gone from provider      → create (drift)
//! managed attribute differs         → update
//!   ... and it is in replace_on_change → replace
//! in state, not declared            → delete
//! ```
//!
//! Attributes under `ExternallyOwnedAfterCreate` never produce an action.

mod diff;

pub use diff::{build, LiveView};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

use crate::domain::EnvironmentName;
use crate::graph::NodeAddress;

/// What the evaluator will do to one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Update,
    Replace { create_before_destroy: bool },
    Delete,
    NoOp,
}

impl ActionKind {
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::NoOp)
    }

    fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Replace {
                create_before_destroy: true,
            } => "+/-",
            Self::Replace {
                create_before_destroy: false,
            } => "-/+",
            Self::Delete => "-",
            Self::NoOp => " ",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace { .. } => "replace",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        };
        f.write_str(name)
    }
}

/// Why a node is changing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    /// Declared for the first time
    New,
    /// Declared configuration changed
    Config,
    /// Live infrastructure diverged from the record
    Drift,
    /// A producer is being created or replaced, so a referenced value changes
    Upstream,
    /// The record marks the node as tainted
    Tainted,
    /// No longer declared
    Removed,
}

impl fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Config => "config",
            Self::Drift => "drift",
            Self::Upstream => "upstream",
            Self::Tainted => "tainted",
            Self::Removed => "removed",
        };
        f.write_str(name)
    }
}

/// One attribute difference, in redacted form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub key: String,
    /// Recorded (or live, for drift) value
    pub before: Option<Value>,
    /// Declared value; `None` when known only after apply
    pub after: Option<Value>,
    pub reason: ChangeReason,
    #[serde(default)]
    pub forces_replacement: bool,
}

/// A single node's planned action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub address: NodeAddress,
    #[serde(flatten)]
    pub kind: ActionKind,
    pub reasons: BTreeSet<ChangeReason>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<AttributeChange>,
}

impl PlannedAction {
    pub(crate) fn new(address: NodeAddress, kind: ActionKind, reason: ChangeReason) -> Self {
        Self {
            address,
            kind,
            reasons: BTreeSet::from([reason]),
            changes: Vec::new(),
        }
    }

    pub fn is_drift_correction(&self) -> bool {
        self.reasons.contains(&ChangeReason::Drift)
    }
}

/// Counts per action kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete",
            self.create, self.update, self.replace, self.delete
        )
    }
}

/// Ordered delta for one environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub environment: EnvironmentName,
    /// Serial of the record this plan was computed against
    pub base_serial: u64,
    pub actions: Vec<PlannedAction>,
}

impl Plan {
    /// Plan that removes everything recorded
    pub fn destroy(environment: EnvironmentName, base_serial: u64, order: Vec<NodeAddress>) -> Self {
        Self {
            environment,
            base_serial,
            actions: order
                .into_iter()
                .map(|address| PlannedAction::new(address, ActionKind::Delete, ChangeReason::Removed))
                .collect(),
        }
    }

    pub fn has_changes(&self) -> bool {
        self.actions.iter().any(|a| a.kind.is_change())
    }

    /// Actions that change something, in execution order
    pub fn changes(&self) -> impl Iterator<Item = &PlannedAction> {
        self.actions.iter().filter(|a| a.kind.is_change())
    }

    pub fn action(&self, address: &NodeAddress) -> Option<&PlannedAction> {
        self.actions.iter().find(|a| &a.address == address)
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for action in &self.actions {
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

    /// Human-readable rendering
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        if !self.has_changes() {
            out.push_str(&format!(
                "No changes. Environment '{}' matches its declared graph.\n",
                self.environment
            ));
            return out;
        }

        out.push_str(&format!("Environment '{}' (serial {}):\n\n", self.environment, self.base_serial));
        for action in self.changes() {
            let reasons: Vec<String> = action.reasons.iter().map(ToString::to_string).collect();
            out.push_str(&format!(
                "  {:>3} {}  ({})\n",
                action.kind.symbol(),
                action.address,
                reasons.join(", ")
            ));
            for change in &action.changes {
                let before = change.before.as_ref().map(Value::to_string).unwrap_or_else(|| "null".into());
                let after = change
                    .after
                    .as_ref()
                    .map(Value::to_string)
                    .unwrap_or_else(|| "(known after apply)".into());
                let marker = if change.forces_replacement { "  # forces replacement" } else { "" };
                out.push_str(&format!("        {}: {} -> {}{}\n", change.key, before, after, marker));
            }
        }
        out.push_str(&format!("\nPlan: {}.\n", self.summary()));
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ResourceKind;

    fn plan(actions: Vec<PlannedAction>) -> Plan {
        Plan {
            environment: EnvironmentName::new("dev").unwrap(),
            base_serial: 3,
            actions,
        }
    }

    #[test]
    fn test_summary_and_has_changes() {
        let vpc = NodeAddress::new("network", ResourceKind::Vpc, "this");
        let sg = NodeAddress::new("cache", ResourceKind::SecurityGroup, "this");
        let p = plan(vec![
            PlannedAction::new(vpc, ActionKind::NoOp, ChangeReason::Config),
            PlannedAction::new(sg, ActionKind::Update, ChangeReason::Drift),
        ]);

        assert!(p.has_changes());
        assert_eq!(p.changes().count(), 1);
        assert_eq!(
            p.summary(),
            PlanSummary {
                update: 1,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_empty_plan_renders_no_changes() {
        let p = plan(Vec::new());
        assert!(!p.has_changes());
        assert!(p.render_text().starts_with("No changes."));
    }

    #[test]
    fn test_text_rendering_marks_replacement() {
        let subnet = NodeAddress::indexed("network", ResourceKind::Subnet, "private", 0);
        let mut action = PlannedAction::new(
            subnet,
            ActionKind::Replace {
                create_before_destroy: false,
            },
            ChangeReason::Config,
        );
        action.changes.push(AttributeChange {
            key: "cidr_block".into(),
            before: Some("10.0.10.0/24".into()),
            after: Some("10.0.20.0/24".into()),
            reason: ChangeReason::Config,
            forces_replacement: true,
        });
        let text = plan(vec![action]).render_text();

        assert!(text.contains("-/+ module.network.subnet.private[0]"));
        assert!(text.contains("forces replacement"));
        assert!(text.contains("1 to replace"));
    }

    #[test]
    fn test_json_rendering_is_flat() {
        let vpc = NodeAddress::new("network", ResourceKind::Vpc, "this");
        let json = plan(vec![PlannedAction::new(vpc, ActionKind::Create, ChangeReason::New)])
            .to_json()
            .unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["actions"][0]["action"], "create");
        assert_eq!(value["actions"][0]["address"], "module.network.vpc.this");
    }
}
