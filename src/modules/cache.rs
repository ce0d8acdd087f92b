// Copyright (c) 2025 - Cowboy AI, Inc.
//! Cache Tier
//!
//! A replicated in-memory cache reachable only on its service port from an
//! allow-listed set of peer security groups.
//!
//! # Invariants
//!
//! - At most [`MAX_PEERS`] peers; one ingress rule per peer, no CIDR rules
//! - `volatile-lru` eviction
//! - At-rest and in-transit encryption on
//! - Snapshots retained only in the highest-trust tier
//! - `node_type` is externally owned once the group exists

use super::ModuleContext;
use crate::domain::invariants::validate_peer_cap;
use crate::domain::{Port, ResourceKind, ValidationError};
use crate::errors::TopologyResult;
use crate::graph::{AttributeValue, ResourceGraph, ResourceNode};

pub const MODULE: &str = "cache";

/// Allow-list cap for peer workloads
pub const MAX_PEERS: usize = 5;

pub const EVICTION_POLICY: &str = "volatile-lru";

/// Cache tier input contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheInput {
    pub vpc_id: AttributeValue,
    pub subnet_ids: Vec<AttributeValue>,
    pub node_type: String,
    pub num_cache_clusters: u32,
    pub engine_version: String,
    pub parameter_group_family: String,
    pub port: Port,
    /// Peer security groups allowed to connect
    pub allowed_peers: Vec<AttributeValue>,
    /// Applied only in the highest-trust tier
    pub snapshot_retention_days: u32,
}

/// Cache tier outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOutputs {
    pub primary_endpoint: AttributeValue,
    pub port: Port,
    pub security_group_id: AttributeValue,
}

/// Build the cache tier
pub fn build(
    graph: &mut ResourceGraph,
    ctx: &ModuleContext,
    input: &CacheInput,
) -> TopologyResult<CacheOutputs> {
    validate_peer_cap(input.allowed_peers.len(), MAX_PEERS)?;
    if !(1..=6).contains(&input.num_cache_clusters) {
        return Err(ValidationError::invalid("cache.num_cache_clusters", "must be between 1 and 6").into());
    }
    if input.subnet_ids.is_empty() {
        return Err(ValidationError::invalid("cache.subnet_ids", "at least one placement subnet").into());
    }

    let mut scope = graph.module(MODULE);
    let name = ctx.resource_name("cache");
    let port = input.port.value();

    let sg = scope.add(
        ResourceNode::new(scope.address(ResourceKind::SecurityGroup, "cache"))
            .attr("name", name.as_str())
            .attr("description", "Cache access from allow-listed peers")
            .attr("vpc_id", input.vpc_id.clone())
            .attr("tags", ctx.tags(&name))
            .replace_on_change("name")
            .replace_on_change("vpc_id"),
    );

    for (i, peer) in input.allowed_peers.iter().enumerate() {
        scope.add(
            ResourceNode::new(scope.indexed(ResourceKind::SecurityGroupRule, "peer", i as u32))
                .attr("security_group_id", sg.output("id"))
                .attr("type", "ingress")
                .attr("protocol", "tcp")
                .attr("from_port", port)
                .attr("to_port", port)
                .attr("source_security_group_id", peer.clone())
                .replace_on_change("source_security_group_id"),
        );
    }

    let subnet_group = scope.add(
        ResourceNode::new(scope.address(ResourceKind::CacheSubnetGroup, "this"))
            .attr("name", name.as_str())
            .attr("subnet_ids", AttributeValue::List(input.subnet_ids.clone())),
    );

    let parameter_group = scope.add(
        ResourceNode::new(scope.address(ResourceKind::CacheParameterGroup, "this"))
            .attr("name", name.as_str())
            .attr("family", input.parameter_group_family.as_str())
            .attr(
                "parameters",
                AttributeValue::map([("maxmemory-policy", EVICTION_POLICY.into())]),
            )
            .replace_on_change("family"),
    );

    let retention = if ctx.tier.is_highest_trust() {
        input.snapshot_retention_days
    } else {
        0
    };
    let replicated = input.num_cache_clusters > 1;

    let group = scope.add(
        ResourceNode::new(scope.address(ResourceKind::CacheReplicationGroup, "this"))
            .attr("replication_group_id", name.as_str())
            .attr("description", format!("Session cache for {}", ctx.prefix()))
            .attr("engine", "redis")
            .attr("engine_version", input.engine_version.as_str())
            .attr("node_type", input.node_type.as_str())
            .attr("num_cache_clusters", input.num_cache_clusters)
            .attr("automatic_failover_enabled", replicated)
            .attr("multi_az_enabled", replicated)
            .attr("port", port)
            .attr("parameter_group_name", parameter_group.output("name"))
            .attr("subnet_group_name", subnet_group.output("name"))
            .attr("security_group_ids", AttributeValue::list([sg.output("id")]))
            .attr("at_rest_encryption_enabled", true)
            .attr("transit_encryption_enabled", true)
            .attr("snapshot_retention_limit", retention)
            .attr_opt("snapshot_window", (retention > 0).then_some("17:00-18:00"))
            .attr("tags", ctx.tags(&name))
            .externally_owned("node_type")
            .replace_on_change("replication_group_id")
            .replace_on_change("at_rest_encryption_enabled"),
    );

    let outputs = CacheOutputs {
        primary_endpoint: group.output("primary_endpoint_address"),
        port: input.port,
        security_group_id: sg.output("id"),
    };
    scope.output("primary_endpoint_address", outputs.primary_endpoint.clone());
    scope.output("port", port);
    scope.output("security_group_id", outputs.security_group_id.clone());
    scope.finish()?;

    Ok(outputs)
}
