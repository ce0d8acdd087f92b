// Copyright (c) 2025 - Cowboy AI, Inc.
//! Declarative Resource Graph
//!
//! Module builders emit [`ResourceNode`]s into a [`ResourceGraph`]. Edges are
//! derived from the [`OutputRef`]s a node reads; the only hand-declared edges
//! are named [`OrderingConstraint`]s for side-effect ordering that has no data
//! dependency.
//!
//! # Architecture
//!
//! ```text
//! EnvironmentParameters
//!        │ compose()
//!        ▼
//! ModuleScope ─commit─> ResourceGraph ──validate──> acyclic, no dangling refs
//!                              │
//!                              ▼
//!                     topological_order() ──> evaluation order
//! ```
//!
//! # Invariants
//!
//! - Addresses are unique
//! - Every reference and ordering constraint points at a declared node
//! - The graph is acyclic; evaluation order is a topological sort
//! - Ties are broken by address so orders are reproducible

pub mod node;
pub mod scope;
pub mod value;

pub use node::{AttributePolicy, LifecyclePolicy, NodeAddress, ResourceNode};
pub use scope::ModuleScope;
pub use value::{AttributeValue, OutputRef, ResolveError, ResolveMode, SensitiveValue};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Graph construction and validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("Node declared twice: {0}")]
    DuplicateAddress(NodeAddress),

    #[error("Module declared twice: {0}")]
    DuplicateModule(String),

    #[error("Node {from} references undeclared node {to}")]
    DanglingReference { from: NodeAddress, to: NodeAddress },

    #[error("Ordering constraint '{name}' names undeclared node {missing}")]
    DanglingOrdering { name: String, missing: NodeAddress },

    #[error("Module {module} output '{output}' references undeclared node {to}")]
    DanglingOutput {
        module: String,
        output: String,
        to: NodeAddress,
    },

    #[error("Dependency cycle among: {}", display_addresses(.0))]
    Cycle(Vec<NodeAddress>),
}

fn display_addresses(addresses: &[NodeAddress]) -> String {
    addresses
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Named side-effect ordering with no data dependency
///
/// `after` must not start until `before` has been created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingConstraint {
    pub name: String,
    pub before: NodeAddress,
    pub after: NodeAddress,
}

/// The nodes a module owns, the optional features it instantiated, and its
/// published outputs
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub name: String,
    pub nodes: BTreeSet<NodeAddress>,
    pub features: BTreeSet<String>,
    pub outputs: BTreeMap<String, AttributeValue>,
}

impl ModuleRecord {
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }
}

/// Declared dependency graph for one environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGraph {
    nodes: BTreeMap<NodeAddress, ResourceNode>,
    ordering: Vec<OrderingConstraint>,
    modules: BTreeMap<String, ModuleRecord>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a builder scope for a named module
    pub fn module(&mut self, name: impl Into<String>) -> ModuleScope<'_> {
        ModuleScope::new(self, name.into())
    }

    pub(crate) fn commit_module(
        &mut self,
        record: ModuleRecord,
        nodes: Vec<ResourceNode>,
        ordering: Vec<OrderingConstraint>,
    ) -> Result<(), GraphError> {
        if self.modules.contains_key(&record.name) {
            return Err(GraphError::DuplicateModule(record.name));
        }

        let mut seen = BTreeSet::new();
        for node in &nodes {
            if self.nodes.contains_key(&node.address) || !seen.insert(node.address.clone()) {
                return Err(GraphError::DuplicateAddress(node.address.clone()));
            }
        }

        for node in nodes {
            self.nodes.insert(node.address.clone(), node);
        }
        self.ordering.extend(ordering);
        self.modules.insert(record.name.clone(), record);
        Ok(())
    }

    pub fn node(&self, address: &NodeAddress) -> Option<&ResourceNode> {
        self.nodes.get(address)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &NodeAddress> {
        self.nodes.keys()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ordering(&self) -> &[OrderingConstraint] {
        &self.ordering
    }

    pub fn module_record(&self, name: &str) -> Option<&ModuleRecord> {
        self.modules.get(name)
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleRecord> {
        self.modules.values()
    }

    /// Nodes of a given kind, in address order
    pub fn nodes_of_kind(&self, kind: crate::domain::ResourceKind) -> Vec<&ResourceNode> {
        self.nodes.values().filter(|n| n.kind() == kind).collect()
    }

    /// Count of nodes of a given kind
    pub fn count_of(&self, kind: crate::domain::ResourceKind) -> usize {
        self.nodes.values().filter(|n| n.kind() == kind).count()
    }

    /// Everything `address` must wait for: data references plus ordering constraints
    pub fn dependencies(&self, address: &NodeAddress) -> BTreeSet<NodeAddress> {
        let mut deps = self
            .nodes
            .get(address)
            .map(ResourceNode::references)
            .unwrap_or_default();
        deps.extend(
            self.ordering
                .iter()
                .filter(|c| &c.after == address)
                .map(|c| c.before.clone()),
        );
        deps
    }

    /// Nodes that wait for `address`
    pub fn dependents(&self, address: &NodeAddress) -> BTreeSet<NodeAddress> {
        self.nodes
            .keys()
            .filter(|candidate| self.dependencies(candidate).contains(address))
            .cloned()
            .collect()
    }

    /// Validate references, ordering constraints, module outputs, and acyclicity
    pub fn validate(&self) -> Result<(), GraphError> {
        for node in self.nodes.values() {
            for target in node.references() {
                if !self.nodes.contains_key(&target) {
                    return Err(GraphError::DanglingReference {
                        from: node.address.clone(),
                        to: target,
                    });
                }
            }
        }

        for constraint in &self.ordering {
            for end in [&constraint.before, &constraint.after] {
                if !self.nodes.contains_key(end) {
                    return Err(GraphError::DanglingOrdering {
                        name: constraint.name.clone(),
                        missing: end.clone(),
                    });
                }
            }
        }

        for module in self.modules.values() {
            for (output, value) in &module.outputs {
                for r in value.references() {
                    if !self.nodes.contains_key(&r.address) {
                        return Err(GraphError::DanglingOutput {
                            module: module.name.clone(),
                            output: output.clone(),
                            to: r.address.clone(),
                        });
                    }
                }
            }
        }

        self.topological_order().map(|_| ())
    }

    /// Kahn's algorithm with address-ordered tie breaking
    pub fn topological_order(&self) -> Result<Vec<NodeAddress>, GraphError> {
        let mut remaining: BTreeMap<&NodeAddress, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<NodeAddress, Vec<&NodeAddress>> = BTreeMap::new();

        for address in self.nodes.keys() {
            let deps: BTreeSet<NodeAddress> = self
                .dependencies(address)
                .into_iter()
                .filter(|d| self.nodes.contains_key(d))
                .collect();
            remaining.insert(address, deps.len());
            for dep in deps {
                dependents.entry(dep).or_default().push(address);
            }
        }

        let mut ready: BTreeSet<&NodeAddress> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(address, _)| *address)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(next) = ready.pop_first() {
            order.push(next.clone());
            if let Some(waiting) = dependents.get(next) {
                for dependent in waiting {
                    if let Some(count) = remaining.get_mut(dependent) {
                        *count -= 1;
                        if *count == 0 {
                            ready.insert(dependent);
                        }
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let placed: BTreeSet<&NodeAddress> = order.iter().collect();
            let cycle = self
                .nodes
                .keys()
                .filter(|address| !placed.contains(address))
                .cloned()
                .collect();
            return Err(GraphError::Cycle(cycle));
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ResourceKind;
    use pretty_assertions::assert_eq;

    fn addr(kind: ResourceKind, name: &str) -> NodeAddress {
        NodeAddress::new("test", kind, name)
    }

    fn build(nodes: Vec<ResourceNode>, ordering: Vec<(&str, NodeAddress, NodeAddress)>) -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        let mut scope = graph.module("test");
        for node in nodes {
            scope.add(node);
        }
        for (name, before, after) in ordering {
            scope.order(name, before, after);
        }
        scope.finish().unwrap();
        graph
    }

    #[test]
    fn test_topological_order_follows_references() {
        let vpc = addr(ResourceKind::Vpc, "this");
        let subnet = addr(ResourceKind::Subnet, "a");
        let table = addr(ResourceKind::RouteTable, "a");
        let graph = build(
            vec![
                ResourceNode::new(table.clone()).attr("vpc_id", vpc.output("id")),
                ResourceNode::new(subnet.clone()).attr("vpc_id", vpc.output("id")),
                ResourceNode::new(vpc.clone()),
            ],
            vec![],
        );

        let order = graph.topological_order().unwrap();
        assert_eq!(order[0], vpc);
        assert_eq!(order.len(), 3);
        assert!(graph.validate().is_ok());
        assert_eq!(graph.dependents(&vpc), BTreeSet::from([subnet, table]));
    }

    #[test]
    fn test_ordering_constraint_is_an_edge() {
        let listener = addr(ResourceKind::Listener, "http");
        let service = addr(ResourceKind::ContainerService, "this");
        let graph = build(
            vec![ResourceNode::new(listener.clone()), ResourceNode::new(service.clone())],
            vec![("service-after-listener", listener.clone(), service.clone())],
        );
        assert_eq!(graph.dependencies(&service), BTreeSet::from([listener.clone()]));
        assert_eq!(graph.topological_order().unwrap(), vec![listener, service]);
    }

    #[test]
    fn test_dangling_reference_rejected() {
        let ghost = addr(ResourceKind::Vpc, "ghost");
        let graph = build(
            vec![ResourceNode::new(addr(ResourceKind::Subnet, "a")).attr("vpc_id", ghost.output("id"))],
            vec![],
        );
        assert!(matches!(
            graph.validate(),
            Err(GraphError::DanglingReference { to, .. }) if to == ghost
        ));
    }

    #[test]
    fn test_cycle_detected() {
        let a = addr(ResourceKind::SecurityGroup, "a");
        let b = addr(ResourceKind::SecurityGroup, "b");
        let c = addr(ResourceKind::Vpc, "free");
        let graph = build(
            vec![
                ResourceNode::new(a.clone()).attr("peer", b.output("id")),
                ResourceNode::new(b.clone()).attr("peer", a.output("id")),
                ResourceNode::new(c),
            ],
            vec![],
        );
        assert_eq!(graph.topological_order(), Err(GraphError::Cycle(vec![a, b])));
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let mut graph = ResourceGraph::new();
        let mut scope = graph.module("test");
        scope.add(ResourceNode::new(addr(ResourceKind::Vpc, "this")));
        scope.add(ResourceNode::new(addr(ResourceKind::Vpc, "this")));
        assert!(matches!(scope.finish(), Err(GraphError::DuplicateAddress(_))));
        assert!(graph.is_empty());
    }
}
