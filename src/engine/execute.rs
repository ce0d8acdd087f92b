// Copyright (c) 2025 - Cowboy AI, Inc.
//! Graph-directed plan execution
//!
//! Creates, updates, and replacements run as a dependency-ordered wave:
//! an action starts once every upstream action it waits for has been
//! applied, independent actions are in flight together, and a failed or
//! skipped action skips everything downstream of it. Deletes run afterwards,
//! consumers before producers.

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::report::{AppliedAction, ApplyReport, FailedAction};
use crate::errors::{TopologyError, TopologyResult};
use crate::graph::{AttributePolicy, NodeAddress, OutputRef, ResolveMode, ResourceGraph, ResourceNode};
use crate::plan::{ActionKind, Plan, PlannedAction};
use crate::provider::{AttributeMap, Provider};
use crate::state::{ResourceState, ResourceStatus, StateRecord};
use crate::state_machine::node_lifecycle::{NodeEvent, NodePhase};
use crate::state_machine::StateMachine;

/// Provider call prepared from the working record
struct Call {
    address: NodeAddress,
    kind: ActionKind,
    /// Existing provider id for updates and replacements
    id: Option<String>,
    plaintext: AttributeMap,
}

/// What a finished call left behind
struct CallResult {
    address: NodeAddress,
    kind: ActionKind,
    /// Outputs of the node that now exists, if any
    outputs: Option<AttributeMap>,
    /// The previously recorded node is gone
    old_removed: bool,
    error: Option<TopologyError>,
}

async fn execute(provider: Arc<dyn Provider>, call: Call) -> CallResult {
    let Call {
        address,
        kind,
        id,
        plaintext,
    } = call;
    let mut result = CallResult {
        address: address.clone(),
        kind,
        outputs: None,
        old_removed: false,
        error: None,
    };

    match (kind, id) {
        (ActionKind::Update, Some(id)) => match provider.update(&address, &id, &plaintext).await {
            Ok(outputs) => result.outputs = Some(outputs),
            Err(e) => result.error = Some(e),
        },
        (ActionKind::Replace { create_before_destroy: true }, Some(id)) => {
            match provider.create(&address, &plaintext).await {
                Ok(outputs) => {
                    result.outputs = Some(outputs);
                    match provider.delete(&address, &id).await {
                        Ok(()) => result.old_removed = true,
                        Err(e) => result.error = Some(e),
                    }
                }
                Err(e) => result.error = Some(e),
            }
        }
        (ActionKind::Replace { create_before_destroy: false }, Some(id)) => {
            match provider.delete(&address, &id).await {
                Ok(()) => {
                    result.old_removed = true;
                    match provider.create(&address, &plaintext).await {
                        Ok(outputs) => result.outputs = Some(outputs),
                        Err(e) => result.error = Some(e),
                    }
                }
                Err(e) => result.error = Some(e),
            }
        }
        // Create, or a replacement whose old node has no recorded id
        _ => match provider.create(&address, &plaintext).await {
            Ok(outputs) => result.outputs = Some(outputs),
            Err(e) => result.error = Some(e),
        },
    }

    result
}

/// Outputs with anything derived from a sensitive input removed
pub(crate) fn strip_sensitive(node: &ResourceNode, mut outputs: AttributeMap) -> AttributeMap {
    for (key, value) in &node.attributes {
        if value.contains_sensitive() {
            outputs.remove(key);
        }
    }
    outputs
}

/// One evaluation over a working copy of the record
pub(crate) struct Run<'a> {
    graph: &'a ResourceGraph,
    provider: Arc<dyn Provider>,
    pub(crate) record: StateRecord,
    pub(crate) report: ApplyReport,
}

impl<'a> Run<'a> {
    pub(crate) fn new(graph: &'a ResourceGraph, provider: Arc<dyn Provider>, record: StateRecord) -> Self {
        let report = ApplyReport::new(record.environment.clone(), record.serial);
        Self {
            graph,
            provider,
            record,
            report,
        }
    }

    /// Execute every action of a plan
    pub(crate) async fn execute(&mut self, plan: &Plan) {
        let wave: BTreeMap<NodeAddress, &PlannedAction> = plan
            .changes()
            .filter(|a| a.kind != ActionKind::Delete)
            .map(|a| (a.address.clone(), a))
            .collect();
        self.run_wave(&wave).await;

        // Ordering-only edges can change without any attribute changing
        for (address, resource) in self.record.resources.iter_mut() {
            if self.graph.node(address).is_some() && self.report.failure(address).is_none() {
                resource.dependencies = self.graph.dependencies(address);
            }
        }

        let deletes: Vec<&NodeAddress> = plan
            .changes()
            .filter(|a| a.kind == ActionKind::Delete)
            .map(|a| &a.address)
            .collect();
        self.run_deletes(&deletes).await;
    }

    async fn run_wave(&mut self, wave: &BTreeMap<NodeAddress, &PlannedAction>) {
        let mut phases: BTreeMap<NodeAddress, NodePhase> =
            wave.keys().map(|a| (a.clone(), NodePhase::Planned)).collect();
        let upstream: BTreeMap<NodeAddress, BTreeSet<NodeAddress>> = wave
            .keys()
            .map(|a| {
                let deps = self
                    .graph
                    .dependencies(a)
                    .into_iter()
                    .filter(|d| wave.contains_key(d))
                    .collect();
                (a.clone(), deps)
            })
            .collect();
        let mut in_flight = FuturesUnordered::new();

        loop {
            self.skip_blocked(&mut phases, &upstream);

            let ready: Vec<NodeAddress> = phases
                .iter()
                .filter(|(_, phase)| **phase == NodePhase::Planned)
                .filter(|(address, _)| {
                    upstream[*address]
                        .iter()
                        .all(|d| phases.get(d).map(NodePhase::unblocks_dependents).unwrap_or(true))
                })
                .map(|(address, _)| address.clone())
                .collect();

            for address in ready {
                advance(&mut phases, &address, NodeEvent::Start);
                let kind = wave[&address].kind;
                match self.prepare(&address, kind) {
                    Ok(call) => {
                        debug!(address = %address, action = %kind, "Starting provider call");
                        in_flight.push(execute(self.provider.clone(), call));
                    }
                    Err(e) => {
                        warn!(address = %address, error = %e, "Could not prepare provider call");
                        advance(&mut phases, &address, NodeEvent::Fail);
                        self.report.failed.push(FailedAction {
                            address,
                            kind,
                            error: e.to_string(),
                        });
                    }
                }
            }

            let Some(result) = in_flight.next().await else {
                self.skip_blocked(&mut phases, &upstream);
                break;
            };
            let event = self.record_result(result);
            advance(&mut phases, &event.0, event.1);
        }
    }

    /// Skip planned actions whose upstream failed or was skipped
    fn skip_blocked(
        &mut self,
        phases: &mut BTreeMap<NodeAddress, NodePhase>,
        upstream: &BTreeMap<NodeAddress, BTreeSet<NodeAddress>>,
    ) {
        loop {
            let blocked: Vec<NodeAddress> = phases
                .iter()
                .filter(|(_, phase)| **phase == NodePhase::Planned)
                .filter(|(address, _)| {
                    upstream[*address].iter().any(|d| {
                        matches!(phases.get(d), Some(NodePhase::Failed) | Some(NodePhase::Skipped))
                    })
                })
                .map(|(address, _)| address.clone())
                .collect();
            if blocked.is_empty() {
                return;
            }
            for address in blocked {
                warn!(address = %address, "Skipping action after upstream failure");
                advance(phases, &address, NodeEvent::UpstreamFailed);
                self.report.skipped.push(address);
            }
        }
    }

    /// Resolve the attributes a call sends against the working record
    fn prepare(&self, address: &NodeAddress, kind: ActionKind) -> TopologyResult<Call> {
        let node = self
            .graph
            .node(address)
            .ok_or_else(|| TopologyError::State(format!("{} is not declared", address)))?;
        let recorded = self.record.resource(address);
        let id = recorded.and_then(ResourceState::id).map(str::to_string);

        let mut plaintext = AttributeMap::new();
        for (key, value) in &node.attributes {
            let in_place = kind == ActionKind::Update;
            if in_place && node.policy_for(key) == AttributePolicy::ExternallyOwnedAfterCreate {
                continue;
            }
            let resolved = value
                .resolve(&|r: &OutputRef| self.record.lookup(r), ResolveMode::Plaintext)
                .map_err(|source| TopologyError::Resolve {
                    address: address.clone(),
                    source,
                })?;
            plaintext.insert(key.clone(), resolved);
        }

        // Keys no longer declared are cleared on update
        if kind == ActionKind::Update {
            if let Some(recorded) = recorded {
                for key in recorded.applied.keys() {
                    if !node.attributes.contains_key(key)
                        && node.policy_for(key) == AttributePolicy::Managed
                    {
                        plaintext.insert(key.clone(), Value::Null);
                    }
                }
            }
        }

        Ok(Call {
            address: address.clone(),
            kind,
            id,
            plaintext,
        })
    }

    fn redacted(&self, node: &ResourceNode, keys: impl Iterator<Item = String>) -> BTreeMap<String, Value> {
        let lookup = |r: &OutputRef| self.record.lookup(r);
        keys.filter_map(|key| {
            let value = node.get(&key)?;
            value
                .resolve(&lookup, ResolveMode::Redacted)
                .ok()
                .map(|resolved| (key, resolved))
        })
        .collect()
    }

    /// Fold a finished call into the working record and report
    fn record_result(&mut self, result: CallResult) -> (NodeAddress, NodeEvent) {
        let CallResult {
            address,
            kind,
            outputs,
            old_removed,
            error,
        } = result;

        if let Some(outputs) = outputs {
            if let Some(node) = self.graph.node(&address) {
                let applied = match (kind, self.record.resource(&address)) {
                    (ActionKind::Update, Some(previous)) => {
                        let mut applied = previous.applied.clone();
                        applied.retain(|key, _| node.attributes.contains_key(key));
                        let managed = node
                            .attributes
                            .keys()
                            .filter(|key| node.policy_for(key) == AttributePolicy::Managed)
                            .cloned();
                        applied.extend(self.redacted(node, managed));
                        applied
                    }
                    _ => self.redacted(node, node.attributes.keys().cloned()),
                };
                let state = ResourceState {
                    declared: node.clone(),
                    applied,
                    outputs: strip_sensitive(node, outputs),
                    dependencies: self.graph.dependencies(&address),
                    status: ResourceStatus::Created,
                };
                self.record.resources.insert(address.clone(), state);
            }
        } else if old_removed {
            self.record.resources.remove(&address);
        }

        match error {
            Some(e) => {
                warn!(address = %address, action = %kind, error = %e, "Provider call failed");
                self.report.failed.push(FailedAction {
                    address: address.clone(),
                    kind,
                    error: e.to_string(),
                });
                (address, NodeEvent::Fail)
            }
            None => {
                info!(address = %address, action = %kind, "Applied");
                self.report.applied.push(AppliedAction {
                    address: address.clone(),
                    kind,
                });
                (address, NodeEvent::Succeed)
            }
        }
    }

    /// Delete recorded nodes in order, skipping producers whose consumers survive
    pub(crate) async fn run_deletes(&mut self, order: &[&NodeAddress]) {
        for address in order {
            let survivors: Vec<NodeAddress> = self
                .record
                .dependents(address)
                .into_iter()
                .filter(|d| d != *address)
                .collect();
            if !survivors.is_empty() {
                warn!(address = %address, consumers = survivors.len(), "Skipping delete while consumers remain");
                self.report.skipped.push((*address).clone());
                continue;
            }

            let id = self
                .record
                .resource(address)
                .and_then(ResourceState::id)
                .map(str::to_string);
            let outcome = match id {
                Some(id) => self.provider.delete(address, &id).await,
                None => Ok(()),
            };

            match outcome {
                Ok(()) => {
                    self.record.resources.remove(*address);
                    info!(address = %address, "Deleted");
                    self.report.applied.push(AppliedAction {
                        address: (*address).clone(),
                        kind: ActionKind::Delete,
                    });
                }
                Err(e) => {
                    warn!(address = %address, error = %e, "Delete failed");
                    self.report.failed.push(FailedAction {
                        address: (*address).clone(),
                        kind: ActionKind::Delete,
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    /// Stamp the record for persisting
    pub(crate) fn finish(mut self) -> (StateRecord, ApplyReport) {
        self.record.serial += 1;
        self.record.updated_at = Utc::now();
        self.report.serial = self.record.serial;
        (self.record, self.report)
    }
}

fn advance(phases: &mut BTreeMap<NodeAddress, NodePhase>, address: &NodeAddress, event: NodeEvent) {
    if let Some(phase) = phases.get_mut(address) {
        match phase.transition(&event) {
            Ok((next, _)) => *phase = next,
            Err(e) => warn!(address = %address, error = %e, "Ignoring lifecycle event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ResourceKind;
    use crate::graph::AttributeValue;
    use serde_json::json;

    #[test]
    fn test_strip_sensitive_outputs() {
        let node = ResourceNode::new(NodeAddress::new("secrets", ResourceKind::SecretVersion, "this"))
            .attr("secret_id", "arn:aws:secretsmanager:ap-northeast-1:123456789012:secret:x")
            .attr("secret_string", AttributeValue::json(AttributeValue::map([(
                "TOKEN",
                AttributeValue::sensitive("hunter2"),
            )])));
        let outputs = AttributeMap::from([
            ("id".to_string(), json!("sv-1")),
            ("secret_string".to_string(), json!("{\"TOKEN\":\"hunter2\"}")),
        ]);

        let stripped = strip_sensitive(&node, outputs);
        assert_eq!(stripped.len(), 1);
        assert!(!serde_json::to_string(&stripped).unwrap().contains("hunter2"));
    }
}
