// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for Network Layout
//!
//! For any zone count the composed network has one public and one private
//! subnet per zone, NAT placement follows the NAT mode, and subnet blocks
//! that collide are always refused before a graph is built.

use proptest::prelude::*;

use crate::fixtures;
use webhook_topology::domain::invariants::validate_subnet_layout;
use webhook_topology::domain::{Ipv4Cidr, ResourceKind};
use webhook_topology::modules::network::NatMode;
use webhook_topology::{compose, EnvironmentParameters};

const ZONE_SUFFIXES: [char; 6] = ['a', 'b', 'c', 'd', 'e', 'f'];

fn with_zones(zones: usize, nat_mode: NatMode) -> EnvironmentParameters {
    let mut params = fixtures::dev();
    params.network.zones = ZONE_SUFFIXES[..zones]
        .iter()
        .map(|suffix| format!("ap-northeast-1{}", suffix))
        .collect();
    params.network.public_subnets = (0..zones)
        .map(|i| Ipv4Cidr::new(format!("10.10.{}.0/24", i)).unwrap())
        .collect();
    params.network.private_subnets = (0..zones)
        .map(|i| Ipv4Cidr::new(format!("10.10.{}.0/24", 100 + i)).unwrap())
        .collect();
    params.network.nat_mode = nat_mode;
    // Without NAT the private tier reaches services through endpoints
    params.network.enable_vpc_endpoints = nat_mode == NatMode::Disabled;
    params
}

fn nat_mode() -> impl Strategy<Value = NatMode> {
    prop_oneof![Just(NatMode::Disabled), Just(NatMode::Single), Just(NatMode::PerZone)]
}

proptest! {
    /// Subnets, NAT gateways, and private route tables scale with zones
    #[test]
    fn prop_network_scales_with_zones(zones in 1usize..=6, mode in nat_mode()) {
        let composition = compose(&with_zones(zones, mode)).unwrap();
        let graph = &composition.graph;

        let (nats, private_tables) = match mode {
            NatMode::Disabled => (0, 1),
            NatMode::Single => (1, 1),
            NatMode::PerZone => (zones, zones),
        };

        prop_assert_eq!(graph.count_of(ResourceKind::Subnet), 2 * zones);
        prop_assert_eq!(graph.count_of(ResourceKind::NatGateway), nats);
        prop_assert_eq!(graph.count_of(ResourceKind::ElasticIp), nats);
        // One shared public table plus the private tables
        prop_assert_eq!(graph.count_of(ResourceKind::RouteTable), 1 + private_tables);
        prop_assert_eq!(graph.count_of(ResourceKind::RouteTableAssociation), 2 * zones);
        prop_assert!(graph.topological_order().is_ok());
    }

    /// Mismatched zone and subnet counts never compose
    #[test]
    fn prop_zone_mismatch_rejected(zones in 2usize..=6, mode in nat_mode()) {
        let mut params = with_zones(zones, mode);
        params.network.private_subnets.pop();
        prop_assert!(compose(&params).is_err());
    }

    /// Two /24 blocks in the same /16 collide exactly when they are equal
    #[test]
    fn prop_subnet_overlap_detected(first in 0u8..=255, second in 0u8..=255) {
        let base = Ipv4Cidr::new("10.10.0.0/16").unwrap();
        let public = vec![Ipv4Cidr::new(format!("10.10.{}.0/24", first)).unwrap()];
        let private = vec![Ipv4Cidr::new(format!("10.10.{}.0/24", second)).unwrap()];

        let result = validate_subnet_layout(&base, &public, &private);
        prop_assert_eq!(result.is_err(), first == second);
    }

    /// A block outside the base range is refused wherever it appears
    #[test]
    fn prop_subnet_outside_base_rejected(octet in 0u8..=255, public_side in any::<bool>()) {
        let base = Ipv4Cidr::new("10.10.0.0/16").unwrap();
        let inside = Ipv4Cidr::new("10.10.0.0/24").unwrap();
        let outside = Ipv4Cidr::new(format!("10.11.{}.0/24", octet)).unwrap();

        let (public, private) = if public_side {
            (vec![outside], vec![inside])
        } else {
            (vec![inside], vec![outside])
        };
        prop_assert!(validate_subnet_layout(&base, &public, &private).is_err());
    }
}
