// Copyright (c) 2025 - Cowboy AI, Inc.
//! Composition tests over the checked-in environment files
//!
//! Every environment must compose into a valid acyclic graph, and optional
//! features must add nodes only where the variable file enables them.

mod fixtures;

use pretty_assertions::assert_eq;
use test_case::test_case;

use webhook_topology::composition::{compose_bootstrap, feature_summary};
use webhook_topology::domain::{Ipv4Cidr, ResourceKind, ValidationError};
use webhook_topology::graph::{AttributePolicy, AttributeValue};
use webhook_topology::{compose, NodeAddress, TopologyError};

#[test_case(fixtures::DEV ; "dev")]
#[test_case(fixtures::STAGING ; "staging")]
#[test_case(fixtures::PRODUCTION ; "production")]
fn test_environment_file_composes(raw: &str) {
    let params = fixtures::params(raw);
    let composition = fixtures::composed(&params);

    assert_eq!(composition.environment, params.environment);
    assert!(composition.graph.validate().is_ok());
    let order = composition.graph.topological_order().unwrap();
    assert_eq!(order.len(), composition.graph.len());

    // Every producer precedes its consumers
    let position = |address: &NodeAddress| order.iter().position(|a| a == address).unwrap();
    for address in &order {
        for dependency in composition.graph.dependencies(address) {
            assert!(
                position(&dependency) < position(address),
                "{} must come before {}",
                dependency,
                address
            );
        }
    }
}

#[test_case(fixtures::DEV, 1 ; "dev shares one nat")]
#[test_case(fixtures::STAGING, 1 ; "staging shares one nat")]
#[test_case(fixtures::PRODUCTION, 3 ; "production nat per zone")]
fn test_nat_gateway_count(raw: &str, expected: usize) {
    let composition = fixtures::composed(&fixtures::params(raw));
    assert_eq!(composition.graph.count_of(ResourceKind::NatGateway), expected);
    assert_eq!(composition.graph.count_of(ResourceKind::ElasticIp), expected);
}

#[test_case(fixtures::DEV, 0, 0 ; "dev has no protective layer")]
#[test_case(fixtures::STAGING, 1, 1 ; "staging protected")]
#[test_case(fixtures::PRODUCTION, 1, 1 ; "production protected")]
fn test_protective_layer_nodes(raw: &str, acls: usize, associations: usize) {
    let composition = fixtures::composed(&fixtures::params(raw));
    assert_eq!(composition.graph.count_of(ResourceKind::WebAcl), acls);
    assert_eq!(composition.graph.count_of(ResourceKind::WebAclAssociation), associations);
    assert_eq!(composition.outputs.get("web_acl_arn").is_some(), acls > 0);
}

#[test]
fn test_toggling_protection_changes_only_its_nodes() {
    let enabled = fixtures::staging();
    let mut disabled = enabled.clone();
    disabled.ingress.protection = webhook_topology::modules::Toggle::Disabled;

    let with = fixtures::composed(&enabled);
    let without = fixtures::composed(&disabled);

    let added: Vec<&NodeAddress> = with
        .graph
        .addresses()
        .filter(|address| without.graph.node(address).is_none())
        .collect();
    assert_eq!(added.len(), 2);
    assert!(added
        .iter()
        .all(|a| matches!(a.kind, ResourceKind::WebAcl | ResourceKind::WebAclAssociation)));
    assert!(without.graph.addresses().all(|a| with.graph.node(a).is_some()));
}

#[test]
fn test_dev_has_no_scaling_nodes() {
    let composition = fixtures::composed(&fixtures::dev());
    assert_eq!(composition.graph.count_of(ResourceKind::ScalableTarget), 0);
    assert_eq!(composition.graph.count_of(ResourceKind::ScalingPolicy), 0);

    let service = composition.graph.node(&fixtures::service()).unwrap();
    assert_eq!(service.policy_for("task_definition"), AttributePolicy::ExternallyOwnedAfterCreate);
    assert_eq!(service.policy_for("desired_count"), AttributePolicy::Managed);
}

#[test]
fn test_autoscaled_service_yields_desired_count() {
    let composition = fixtures::composed(&fixtures::staging());
    assert_eq!(composition.graph.count_of(ResourceKind::ScalableTarget), 1);
    assert_eq!(composition.graph.count_of(ResourceKind::ScalingPolicy), 2);

    let service = composition.graph.node(&fixtures::service()).unwrap();
    assert_eq!(service.policy_for("task_definition"), AttributePolicy::ExternallyOwnedAfterCreate);
    assert_eq!(service.policy_for("desired_count"), AttributePolicy::ExternallyOwnedAfterCreate);
}

#[test]
fn test_custom_domain_only_where_enabled() {
    let production = fixtures::composed(&fixtures::production());
    let staging = fixtures::composed(&fixtures::staging());

    assert_eq!(production.graph.count_of(ResourceKind::ApiDomainName), 1);
    assert_eq!(production.graph.count_of(ResourceKind::Certificate), 1);
    assert_eq!(staging.graph.count_of(ResourceKind::ApiDomainName), 0);
    assert_eq!(staging.graph.count_of(ResourceKind::Certificate), 0);

    let summary = feature_summary(&fixtures::production());
    assert_eq!(summary.get("custom_domain"), Some(&true));
    assert_eq!(feature_summary(&fixtures::dev()).get("custom_domain"), Some(&false));
}

#[test]
fn test_subnets_follow_zone_order() {
    let composition = fixtures::composed(&fixtures::production());
    for (i, zone) in ["ap-northeast-1a", "ap-northeast-1c", "ap-northeast-1d"].iter().enumerate() {
        let subnet = composition
            .graph
            .node(&NodeAddress::indexed("network", ResourceKind::Subnet, "private", i as u32))
            .unwrap();
        assert_eq!(
            subnet.attributes.get("availability_zone"),
            Some(&AttributeValue::from(*zone))
        );
    }
}

#[test]
fn test_overlapping_subnets_rejected_before_building() {
    let mut params = fixtures::dev();
    params.network.private_subnets[1] = Ipv4Cidr::new("10.10.0.0/23").unwrap();

    assert!(matches!(
        compose(&params),
        Err(TopologyError::ContractViolation(ValidationError::SubnetOverlap { .. }))
    ));
}

#[test]
fn test_subnet_outside_block_rejected() {
    let mut params = fixtures::dev();
    params.network.public_subnets[0] = Ipv4Cidr::new("192.168.0.0/24").unwrap();

    assert!(matches!(
        compose(&params),
        Err(TopologyError::ContractViolation(ValidationError::SubnetOutsideBlock { .. }))
    ));
}

#[test]
fn test_root_outputs_published() {
    let composition = fixtures::composed(&fixtures::dev());
    for name in [
        "vpc_id",
        "private_subnet_ids",
        "repository_url",
        "secret_arn",
        "cache_endpoint",
        "load_balancer_dns_name",
        "webhook_url",
        "task_execution_role_arn",
    ] {
        assert!(composition.outputs.get(name).is_some(), "missing output {}", name);
    }
    assert!(composition
        .outputs
        .values
        .values()
        .all(|output| !output.value.contains_sensitive()));
}

#[test]
fn test_bootstrap_graph_is_separate() {
    let bootstrap = compose_bootstrap(&fixtures::dev()).unwrap();
    assert_eq!(bootstrap.environment.as_str(), "bootstrap");
    assert_eq!(bootstrap.graph.count_of(ResourceKind::ObjectBucket), 1);
    assert_eq!(bootstrap.graph.count_of(ResourceKind::Vpc), 0);
}
