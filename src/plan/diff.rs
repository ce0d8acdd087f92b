// Copyright (c) 2025 - Cowboy AI, Inc.
//! Graph-to-state diff

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::{ActionKind, AttributeChange, ChangeReason, Plan, PlannedAction};
use crate::errors::{TopologyError, TopologyResult};
use crate::graph::{AttributePolicy, NodeAddress, OutputRef, ResolveError, ResolveMode, ResourceGraph, ResourceNode};
use crate::provider::AttributeMap;
use crate::state::{ResourceState, StateRecord};

/// Provider view of recorded nodes from a refresh
///
/// `Some(None)` means the node no longer exists. Addresses that were not
/// refreshed are absent and skip drift detection.
pub type LiveView = BTreeMap<NodeAddress, Option<AttributeMap>>;

/// Outputs that will change during this run
#[derive(Default)]
struct Pending {
    /// Nodes being created or replaced; every output is unknown
    recreated: BTreeSet<NodeAddress>,
    /// Nodes updated in place; only outputs echoing changed keys are unknown
    updated: BTreeMap<NodeAddress, BTreeSet<String>>,
}

impl Pending {
    fn unknown(&self, reference: &OutputRef) -> bool {
        self.recreated.contains(&reference.address)
            || self
                .updated
                .get(&reference.address)
                .map(|keys| keys.contains(&reference.attribute))
                .unwrap_or(false)
    }

    fn record(&mut self, action: &PlannedAction) {
        match action.kind {
            ActionKind::Create | ActionKind::Replace { .. } => {
                self.recreated.insert(action.address.clone());
            }
            ActionKind::Update => {
                self.updated.insert(
                    action.address.clone(),
                    action.changes.iter().map(|c| c.key.clone()).collect(),
                );
            }
            ActionKind::Delete | ActionKind::NoOp => {}
        }
    }
}

/// Diff the declared graph against the record and an optional refresh
pub fn build(graph: &ResourceGraph, state: &StateRecord, live: &LiveView) -> TopologyResult<Plan> {
    let order = graph.topological_order()?;
    let mut pending = Pending::default();
    let mut actions = Vec::with_capacity(order.len());

    for address in order {
        let Some(node) = graph.node(&address) else {
            continue;
        };

        let action = match state.resource(&address) {
            None => create_action(node, state, &pending, ChangeReason::New)?,
            Some(recorded) if recorded.is_tainted() => {
                let mut action = create_action(node, state, &pending, ChangeReason::Tainted)?;
                action.kind = ActionKind::Replace {
                    create_before_destroy: node.lifecycle.create_before_destroy,
                };
                action
            }
            Some(recorded) => match live.get(&address) {
                Some(None) => create_action(node, state, &pending, ChangeReason::Drift)?,
                current => diff_node(node, recorded, current.and_then(Option::as_ref), state, &pending)?,
            },
        };

        if action.kind.is_change() {
            debug!(address = %action.address, action = %action.kind, "Planned change");
        }
        pending.record(&action);
        actions.push(action);
    }

    let removed: BTreeSet<NodeAddress> = state
        .resources
        .keys()
        .filter(|address| graph.node(address).is_none())
        .cloned()
        .collect();
    for address in state.deletion_order(&removed) {
        debug!(address = %address, "Planned delete");
        actions.push(PlannedAction::new(address, ActionKind::Delete, ChangeReason::Removed));
    }

    Ok(Plan {
        environment: state.environment.clone(),
        base_serial: state.serial,
        actions,
    })
}

/// Resolve one declared value in redacted form
///
/// `Ok(None)` means the value depends on an output produced during this run.
fn resolve_declared(
    node: &ResourceNode,
    key: &str,
    state: &StateRecord,
    pending: &Pending,
) -> TopologyResult<Option<Value>> {
    let Some(value) = node.get(key) else {
        return Ok(Some(Value::Null));
    };
    let lookup = |r: &OutputRef| {
        if pending.unknown(r) {
            None
        } else {
            state.lookup(r)
        }
    };

    match value.resolve(&lookup, ResolveMode::Redacted) {
        Ok(resolved) => Ok(Some(resolved)),
        Err(ResolveError::Unresolved(r)) if pending.unknown(&r) => Ok(None),
        Err(source) => Err(TopologyError::Resolve {
            address: node.address.clone(),
            source,
        }),
    }
}

fn create_action(
    node: &ResourceNode,
    state: &StateRecord,
    pending: &Pending,
    reason: ChangeReason,
) -> TopologyResult<PlannedAction> {
    let mut action = PlannedAction::new(node.address.clone(), ActionKind::Create, reason);
    for key in node.attributes.keys() {
        action.changes.push(AttributeChange {
            key: key.clone(),
            before: None,
            after: resolve_declared(node, key, state, pending)?,
            reason,
            forces_replacement: false,
        });
    }
    Ok(action)
}

fn diff_node(
    node: &ResourceNode,
    recorded: &ResourceState,
    live: Option<&AttributeMap>,
    state: &StateRecord,
    pending: &Pending,
) -> TopologyResult<PlannedAction> {
    let mut changes = Vec::new();
    let keys: BTreeSet<&String> = node.attributes.keys().chain(recorded.applied.keys()).collect();

    for key in keys {
        if node.policy_for(key) == AttributePolicy::ExternallyOwnedAfterCreate {
            continue;
        }
        let before = recorded.applied.get(key.as_str());
        let forces_replacement = node.forces_replacement(key);

        match resolve_declared(node, key, state, pending)? {
            None => changes.push(AttributeChange {
                key: key.clone(),
                before: before.cloned(),
                after: None,
                reason: ChangeReason::Upstream,
                forces_replacement,
            }),
            Some(desired) if before != Some(&desired) => changes.push(AttributeChange {
                key: key.clone(),
                before: before.cloned(),
                after: Some(desired),
                reason: ChangeReason::Config,
                forces_replacement,
            }),
            Some(desired) => {
                // Sensitive values reach the provider as plaintext and are recorded redacted
                let sensitive = node.get(key).map(|v| v.contains_sensitive()).unwrap_or(false);
                if let Some(live) = live.filter(|_| !sensitive) {
                    let actual = live.get(key.as_str()).cloned().unwrap_or(Value::Null);
                    if actual != desired {
                        changes.push(AttributeChange {
                            key: key.clone(),
                            before: Some(actual),
                            after: Some(desired),
                            reason: ChangeReason::Drift,
                            forces_replacement,
                        });
                    }
                }
            }
        }
    }

    let kind = if changes.is_empty() {
        ActionKind::NoOp
    } else if changes.iter().any(|c| c.forces_replacement) {
        ActionKind::Replace {
            create_before_destroy: node.lifecycle.create_before_destroy,
        }
    } else {
        ActionKind::Update
    };

    Ok(PlannedAction {
        address: node.address.clone(),
        kind,
        reasons: changes.iter().map(|c| c.reason).collect(),
        changes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EnvironmentName, ResourceKind};
    use crate::graph::AttributeValue;
    use crate::state::ResourceStatus;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn vpc() -> NodeAddress {
        NodeAddress::new("network", ResourceKind::Vpc, "this")
    }

    fn subnet() -> NodeAddress {
        NodeAddress::indexed("network", ResourceKind::Subnet, "private", 0)
    }

    fn graph(cidr: &str) -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        let mut scope = graph.module("network");
        scope.add(
            ResourceNode::new(vpc())
                .attr("cidr_block", "10.0.0.0/16")
                .attr("tags", AttributeValue::map([("Name", "dev".into())]))
                .externally_owned("tags"),
        );
        scope.add(
            ResourceNode::new(subnet())
                .attr("vpc_id", vpc().output("id"))
                .attr("cidr_block", cidr)
                .replace_on_change("cidr_block"),
        );
        scope.finish().unwrap();
        graph
    }

    fn applied(graph: &ResourceGraph) -> StateRecord {
        let mut state = StateRecord::new(EnvironmentName::new("dev").unwrap());
        state.serial = 1;
        for node in graph.nodes() {
            let id = format!("{}-1", node.address.kind);
            let lookup = |r: &OutputRef| Some(Value::from(format!("{}-1", r.address.kind)));
            let applied = node
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.resolve(&lookup, ResolveMode::Redacted).unwrap()))
                .collect();
            state.resources.insert(
                node.address.clone(),
                ResourceState {
                    declared: node.clone(),
                    applied,
                    outputs: BTreeMap::from([("id".to_string(), Value::from(id))]),
                    dependencies: node.references(),
                    status: ResourceStatus::Created,
                },
            );
        }
        state
    }

    #[test]
    fn test_empty_state_creates_everything_in_order() {
        let g = graph("10.0.10.0/24");
        let state = StateRecord::new(EnvironmentName::new("dev").unwrap());
        let plan = build(&g, &state, &LiveView::new()).unwrap();

        assert_eq!(plan.summary().create, 2);
        assert_eq!(plan.actions[0].address, vpc());
        let subnet_action = plan.action(&subnet()).unwrap();
        let vpc_id = subnet_action.changes.iter().find(|c| c.key == "vpc_id").unwrap();
        assert_eq!(vpc_id.after, None);
    }

    #[test]
    fn test_converged_state_is_noop() {
        let g = graph("10.0.10.0/24");
        let state = applied(&g);
        let plan = build(&g, &state, &LiveView::new()).unwrap();
        assert!(!plan.has_changes());
    }

    #[test]
    fn test_immutable_change_forces_replacement() {
        let state = applied(&graph("10.0.10.0/24"));
        let plan = build(&graph("10.0.20.0/24"), &state, &LiveView::new()).unwrap();

        let action = plan.action(&subnet()).unwrap();
        assert_eq!(
            action.kind,
            ActionKind::Replace {
                create_before_destroy: false
            }
        );
        assert_eq!(action.changes[0].before, Some(json!("10.0.10.0/24")));
    }

    #[test]
    fn test_externally_owned_drift_is_ignored() {
        let g = graph("10.0.10.0/24");
        let state = applied(&g);
        let live = LiveView::from([(
            vpc(),
            Some(AttributeMap::from([
                ("cidr_block".to_string(), json!("10.0.0.0/16")),
                ("tags".to_string(), json!({"Name": "renamed", "Owner": "ops"})),
            ])),
        )]);

        let plan = build(&g, &state, &live).unwrap();
        assert_eq!(plan.action(&vpc()).unwrap().kind, ActionKind::NoOp);
    }

    #[test]
    fn test_managed_drift_surfaces_as_update() {
        let g = graph("10.0.10.0/24");
        let state = applied(&g);
        let live = LiveView::from([(
            subnet(),
            Some(AttributeMap::from([
                ("vpc_id".to_string(), json!("vpc-1")),
                ("cidr_block".to_string(), json!("10.0.99.0/24")),
            ])),
        )]);

        let plan = build(&g, &state, &live).unwrap();
        let action = plan.action(&subnet()).unwrap();
        assert!(action.is_drift_correction());
        assert_eq!(action.changes[0].before, Some(json!("10.0.99.0/24")));
    }

    #[test]
    fn test_removed_out_of_band_is_recreated() {
        let g = graph("10.0.10.0/24");
        let state = applied(&g);
        let live = LiveView::from([(vpc(), None)]);

        let plan = build(&g, &state, &live).unwrap();
        assert_eq!(plan.action(&vpc()).unwrap().kind, ActionKind::Create);
        // The subnet reads the new VPC id
        assert_eq!(
            plan.action(&subnet()).unwrap().reasons,
            BTreeSet::from([ChangeReason::Upstream])
        );
    }

    #[test]
    fn test_undeclared_nodes_are_deleted_consumers_first() {
        let state = applied(&graph("10.0.10.0/24"));
        let plan = build(&ResourceGraph::new(), &state, &LiveView::new()).unwrap();

        let deletes: Vec<&NodeAddress> = plan.changes().map(|a| &a.address).collect();
        assert_eq!(deletes, vec![&subnet(), &vpc()]);
    }
}
