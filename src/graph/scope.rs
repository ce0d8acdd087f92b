// Copyright (c) 2025 - Cowboy AI, Inc.
//! Module Builder Scope
//!
//! A [`ModuleScope`] stages the nodes, ordering constraints, and outputs of
//! one module and commits them to the graph in [`ModuleScope::finish`].
//! Optional features are built inside [`ModuleScope::subtree`]: either the
//! whole feature lands or none of it does.

use std::collections::{BTreeMap, BTreeSet};

use super::node::{NodeAddress, ResourceNode};
use super::value::AttributeValue;
use super::{GraphError, ModuleRecord, OrderingConstraint, ResourceGraph};
use crate::domain::ResourceKind;

/// Staging area for one module's declarations
pub struct ModuleScope<'g> {
    graph: &'g mut ResourceGraph,
    name: String,
    nodes: Vec<ResourceNode>,
    ordering: Vec<OrderingConstraint>,
    outputs: BTreeMap<String, AttributeValue>,
    features: BTreeSet<String>,
}

impl<'g> ModuleScope<'g> {
    pub(crate) fn new(graph: &'g mut ResourceGraph, name: String) -> Self {
        Self {
            graph,
            name,
            nodes: Vec::new(),
            ordering: Vec::new(),
            outputs: BTreeMap::new(),
            features: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address of a node in this module
    pub fn address(&self, kind: ResourceKind, name: &str) -> NodeAddress {
        NodeAddress::new(self.name.clone(), kind, name)
    }

    /// Address of the `index`th node of a counted group in this module
    pub fn indexed(&self, kind: ResourceKind, name: &str, index: u32) -> NodeAddress {
        NodeAddress::indexed(self.name.clone(), kind, name, index)
    }

    /// Stage a node and return its address
    pub fn add(&mut self, node: ResourceNode) -> NodeAddress {
        let address = node.address.clone();
        self.nodes.push(node);
        address
    }

    /// Declare that `after` must wait for `before`
    pub fn order(&mut self, name: impl Into<String>, before: NodeAddress, after: NodeAddress) {
        self.ordering.push(OrderingConstraint {
            name: name.into(),
            before,
            after,
        });
    }

    /// Publish a module output
    pub fn output(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.outputs.insert(name.into(), value.into());
    }

    /// Staged node count
    pub fn staged(&self) -> usize {
        self.nodes.len()
    }

    /// Build an optional feature all-or-nothing
    ///
    /// Everything `build` stages is kept only if it returns `Ok`; on error the
    /// scope is rolled back to where it was before the call.
    pub fn subtree<T, E, F>(&mut self, feature: &str, build: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
    {
        let nodes = self.nodes.len();
        let ordering = self.ordering.len();
        let outputs = self.outputs.clone();

        match build(self) {
            Ok(value) => {
                self.features.insert(feature.to_string());
                Ok(value)
            }
            Err(err) => {
                self.nodes.truncate(nodes);
                self.ordering.truncate(ordering);
                self.outputs = outputs;
                Err(err)
            }
        }
    }

    /// Commit the module to the graph
    pub fn finish(self) -> Result<(), GraphError> {
        let record = ModuleRecord {
            name: self.name,
            nodes: self.nodes.iter().map(|n| n.address.clone()).collect(),
            features: self.features,
            outputs: self.outputs,
        };
        self.graph.commit_module(record, self.nodes, self.ordering)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtree_commits_on_success() {
        let mut graph = ResourceGraph::new();
        let mut scope = graph.module("ingress");
        scope.add(ResourceNode::new(scope.address(ResourceKind::RestApi, "this")));
        let result: Result<(), String> = scope.subtree("protection", |s| {
            let acl = s.add(ResourceNode::new(s.address(ResourceKind::WebAcl, "this")));
            s.output("web_acl_arn", acl.output("arn"));
            Ok(())
        });
        assert!(result.is_ok());
        scope.finish().unwrap();

        let record = graph.module_record("ingress").unwrap();
        assert!(record.has_feature("protection"));
        assert_eq!(graph.len(), 2);
        assert!(record.outputs.contains_key("web_acl_arn"));
    }

    #[test]
    fn test_subtree_rolls_back_on_error() {
        let mut graph = ResourceGraph::new();
        let mut scope = graph.module("ingress");
        scope.add(ResourceNode::new(scope.address(ResourceKind::RestApi, "this")));
        let result: Result<(), String> = scope.subtree("custom_domain", |s| {
            s.add(ResourceNode::new(s.address(ResourceKind::Certificate, "this")));
            s.output("domain", "api.example.com");
            Err("zone mismatch".to_string())
        });
        assert!(result.is_err());
        assert_eq!(scope.staged(), 1);
        scope.finish().unwrap();

        let record = graph.module_record("ingress").unwrap();
        assert!(!record.has_feature("custom_domain"));
        assert!(record.outputs.is_empty());
        assert_eq!(graph.count_of(ResourceKind::Certificate), 0);
    }
}
