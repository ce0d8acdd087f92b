// Copyright (c) 2025 - Cowboy AI, Inc.
//! Network Fabric
//!
//! One routable network with a public and a private subnet per zone, one
//! route table per tier, and NAT egress in one of three modes.
//!
//! # NAT Modes
//!
//! ```text
//! single:    private[*] ──> route_table.private ──> nat_gateway.this (zone 0)
//! per_zone:  private[i] ──> route_table.private[i] ──> nat_gateway.this[i] (zone i)
//! disabled:  private[*] ──> route_table.private (no default route)
//! ```
//!
//! # Invariants
//!
//! - Private subnets never map public addresses
//! - A private default route always targets a NAT in the same or designated zone
//! - Zone, public block, and private block lists are equal length

use serde::{Deserialize, Serialize};

use super::ModuleContext;
use crate::domain::invariants::{validate_private_egress, validate_subnet_layout, validate_zone_alignment};
use crate::domain::{Ipv4Cidr, ResourceKind};
use crate::errors::TopologyResult;
use crate::graph::{AttributeValue, NodeAddress, ResourceGraph, ResourceNode};

pub const MODULE: &str = "network";

/// NAT egress placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NatMode {
    Disabled,
    /// One shared NAT in the first zone
    #[default]
    Single,
    /// One NAT per zone
    PerZone,
}

/// Network fabric input contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInput {
    pub cidr: Ipv4Cidr,
    pub zones: Vec<String>,
    pub public_subnets: Vec<Ipv4Cidr>,
    pub private_subnets: Vec<Ipv4Cidr>,
    pub nat_mode: NatMode,
    pub enable_vpc_endpoints: bool,
}

impl NetworkInput {
    pub fn validate(&self) -> TopologyResult<()> {
        validate_zone_alignment(&self.zones, &self.public_subnets, &self.private_subnets)?;
        validate_subnet_layout(&self.cidr, &self.public_subnets, &self.private_subnets)?;
        validate_private_egress(self.nat_mode != NatMode::Disabled, self.enable_vpc_endpoints)?;
        Ok(())
    }
}

/// Network fabric outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkOutputs {
    pub vpc_id: AttributeValue,
    pub vpc_cidr: Ipv4Cidr,
    pub public_subnet_ids: Vec<AttributeValue>,
    pub private_subnet_ids: Vec<AttributeValue>,
    pub private_route_table_ids: Vec<AttributeValue>,
    pub nat_gateway_ids: Vec<AttributeValue>,
}

const INTERFACE_ENDPOINTS: &[(&str, &str)] = &[
    ("ecr_api", "ecr.api"),
    ("ecr_dkr", "ecr.dkr"),
    ("logs", "logs"),
    ("secretsmanager", "secretsmanager"),
];

/// Build the network fabric
pub fn build(
    graph: &mut ResourceGraph,
    ctx: &ModuleContext,
    input: &NetworkInput,
) -> TopologyResult<NetworkOutputs> {
    input.validate()?;

    let mut scope = graph.module(MODULE);

    let vpc_name = ctx.resource_name("vpc");
    let vpc = scope.add(
        ResourceNode::new(scope.address(ResourceKind::Vpc, "this"))
            .attr("cidr_block", input.cidr.as_cidr())
            .attr("enable_dns_hostnames", true)
            .attr("enable_dns_support", true)
            .attr("tags", ctx.tags(&vpc_name))
            .replace_on_change("cidr_block"),
    );
    let vpc_id = vpc.output("id");

    let igw = scope.add(
        ResourceNode::new(scope.address(ResourceKind::InternetGateway, "this"))
            .attr("vpc_id", vpc_id.clone())
            .attr("tags", ctx.tags(&ctx.resource_name("igw"))),
    );

    let mut public_subnets = Vec::with_capacity(input.zones.len());
    let mut private_subnets = Vec::with_capacity(input.zones.len());
    for (i, zone) in input.zones.iter().enumerate() {
        let index = i as u32;
        public_subnets.push(scope.add(subnet(
            scope.indexed(ResourceKind::Subnet, "public", index),
            &vpc_id,
            &input.public_subnets[i],
            zone,
            true,
            ctx.tags(&ctx.resource_name(&format!("public-{}", zone))),
        )));
        private_subnets.push(scope.add(subnet(
            scope.indexed(ResourceKind::Subnet, "private", index),
            &vpc_id,
            &input.private_subnets[i],
            zone,
            false,
            ctx.tags(&ctx.resource_name(&format!("private-{}", zone))),
        )));
    }

    // Public tier: one shared table with the internet default route
    let public_table = scope.add(
        ResourceNode::new(scope.address(ResourceKind::RouteTable, "public"))
            .attr("vpc_id", vpc_id.clone())
            .attr("tags", ctx.tags(&ctx.resource_name("public"))),
    );
    scope.add(
        ResourceNode::new(scope.address(ResourceKind::Route, "public_internet"))
            .attr("route_table_id", public_table.output("id"))
            .attr("destination_cidr_block", "0.0.0.0/0")
            .attr("gateway_id", igw.output("id")),
    );
    for (i, subnet) in public_subnets.iter().enumerate() {
        scope.add(association(
            scope.indexed(ResourceKind::RouteTableAssociation, "public", i as u32),
            subnet,
            &public_table,
        ));
    }

    // Private tier
    let mut nat_gateways = Vec::new();
    let mut private_tables = Vec::new();
    match input.nat_mode {
        NatMode::Disabled | NatMode::Single => {
            let table = scope.add(
                ResourceNode::new(scope.address(ResourceKind::RouteTable, "private"))
                    .attr("vpc_id", vpc_id.clone())
                    .attr("tags", ctx.tags(&ctx.resource_name("private"))),
            );

            if input.nat_mode == NatMode::Single {
                let eip = scope.add(elastic_ip(scope.address(ResourceKind::ElasticIp, "nat"), ctx, "nat"));
                let nat = scope.add(nat_gateway(
                    scope.address(ResourceKind::NatGateway, "this"),
                    &eip,
                    &public_subnets[0],
                    ctx.tags(&ctx.resource_name("nat")),
                ));
                scope.order("nat-after-internet-gateway", igw.clone(), nat.clone());
                scope.add(
                    ResourceNode::new(scope.address(ResourceKind::Route, "private_nat"))
                        .attr("route_table_id", table.output("id"))
                        .attr("destination_cidr_block", "0.0.0.0/0")
                        .attr("nat_gateway_id", nat.output("id")),
                );
                nat_gateways.push(nat);
            }

            for (i, subnet) in private_subnets.iter().enumerate() {
                scope.add(association(
                    scope.indexed(ResourceKind::RouteTableAssociation, "private", i as u32),
                    subnet,
                    &table,
                ));
            }
            private_tables.push(table);
        }
        NatMode::PerZone => {
            for (i, zone) in input.zones.iter().enumerate() {
                let index = i as u32;
                let eip = scope.add(elastic_ip(
                    scope.indexed(ResourceKind::ElasticIp, "nat", index),
                    ctx,
                    &format!("nat-{}", zone),
                ));
                let nat = scope.add(nat_gateway(
                    scope.indexed(ResourceKind::NatGateway, "this", index),
                    &eip,
                    &public_subnets[i],
                    ctx.tags(&ctx.resource_name(&format!("nat-{}", zone))),
                ));
                scope.order("nat-after-internet-gateway", igw.clone(), nat.clone());

                let table = scope.add(
                    ResourceNode::new(scope.indexed(ResourceKind::RouteTable, "private", index))
                        .attr("vpc_id", vpc_id.clone())
                        .attr("tags", ctx.tags(&ctx.resource_name(&format!("private-{}", zone)))),
                );
                scope.add(
                    ResourceNode::new(scope.indexed(ResourceKind::Route, "private_nat", index))
                        .attr("route_table_id", table.output("id"))
                        .attr("destination_cidr_block", "0.0.0.0/0")
                        .attr("nat_gateway_id", nat.output("id")),
                );
                scope.add(association(
                    scope.indexed(ResourceKind::RouteTableAssociation, "private", index),
                    &private_subnets[i],
                    &table,
                ));

                nat_gateways.push(nat);
                private_tables.push(table);
            }
        }
    }

    let private_subnet_ids: Vec<AttributeValue> =
        private_subnets.iter().map(|s| s.output("id")).collect();
    let private_route_table_ids: Vec<AttributeValue> =
        private_tables.iter().map(|t| t.output("id")).collect();

    if input.enable_vpc_endpoints {
        scope.subtree("vpc_endpoints", |scope| -> TopologyResult<()> {
            let sg_name = ctx.resource_name("endpoints");
            let sg = scope.add(
                ResourceNode::new(scope.address(ResourceKind::SecurityGroup, "endpoints"))
                    .attr("name", sg_name.as_str())
                    .attr("description", "Private service endpoints")
                    .attr("vpc_id", vpc_id.clone())
                    .attr("tags", ctx.tags(&sg_name))
                    .replace_on_change("name"),
            );
            scope.add(
                ResourceNode::new(scope.address(ResourceKind::SecurityGroupRule, "endpoints_https"))
                    .attr("security_group_id", sg.output("id"))
                    .attr("type", "ingress")
                    .attr("protocol", "tcp")
                    .attr("from_port", 443u16)
                    .attr("to_port", 443u16)
                    .attr("cidr_blocks", AttributeValue::list([input.cidr.as_cidr()])),
            );

            for (name, service) in INTERFACE_ENDPOINTS {
                scope.add(
                    ResourceNode::new(scope.address(ResourceKind::VpcEndpoint, name))
                        .attr("vpc_id", vpc_id.clone())
                        .attr("service_name", format!("com.amazonaws.{}.{}", ctx.region, service))
                        .attr("vpc_endpoint_type", "Interface")
                        .attr("private_dns_enabled", true)
                        .attr("subnet_ids", AttributeValue::List(private_subnet_ids.clone()))
                        .attr("security_group_ids", AttributeValue::list([sg.output("id")]))
                        .replace_on_change("service_name")
                        .replace_on_change("vpc_endpoint_type"),
                );
            }

            scope.add(
                ResourceNode::new(scope.address(ResourceKind::VpcEndpoint, "s3"))
                    .attr("vpc_id", vpc_id.clone())
                    .attr("service_name", format!("com.amazonaws.{}.s3", ctx.region))
                    .attr("vpc_endpoint_type", "Gateway")
                    .attr("route_table_ids", AttributeValue::List(private_route_table_ids.clone()))
                    .replace_on_change("service_name")
                    .replace_on_change("vpc_endpoint_type"),
            );
            Ok(())
        })?;
    }

    let public_subnet_ids: Vec<AttributeValue> =
        public_subnets.iter().map(|s| s.output("id")).collect();
    let nat_gateway_ids: Vec<AttributeValue> = nat_gateways.iter().map(|n| n.output("id")).collect();

    scope.output("vpc_id", vpc_id.clone());
    scope.output("public_subnet_ids", AttributeValue::List(public_subnet_ids.clone()));
    scope.output("private_subnet_ids", AttributeValue::List(private_subnet_ids.clone()));
    scope.output("nat_gateway_ids", AttributeValue::List(nat_gateway_ids.clone()));
    scope.finish()?;

    Ok(NetworkOutputs {
        vpc_id,
        vpc_cidr: input.cidr,
        public_subnet_ids,
        private_subnet_ids,
        private_route_table_ids,
        nat_gateway_ids,
    })
}

fn subnet(
    address: NodeAddress,
    vpc_id: &AttributeValue,
    cidr: &Ipv4Cidr,
    zone: &str,
    public: bool,
    tags: AttributeValue,
) -> ResourceNode {
    ResourceNode::new(address)
        .attr("vpc_id", vpc_id.clone())
        .attr("cidr_block", cidr.as_cidr())
        .attr("availability_zone", zone)
        .attr("map_public_ip_on_launch", public)
        .attr("tags", tags)
        .replace_on_change("cidr_block")
        .replace_on_change("availability_zone")
}

fn association(address: NodeAddress, subnet: &NodeAddress, table: &NodeAddress) -> ResourceNode {
    ResourceNode::new(address)
        .attr("subnet_id", subnet.output("id"))
        .attr("route_table_id", table.output("id"))
}

fn elastic_ip(address: NodeAddress, ctx: &ModuleContext, suffix: &str) -> ResourceNode {
    ResourceNode::new(address)
        .attr("domain", "vpc")
        .attr("tags", ctx.tags(&ctx.resource_name(suffix)))
}

fn nat_gateway(
    address: NodeAddress,
    eip: &NodeAddress,
    subnet: &NodeAddress,
    tags: AttributeValue,
) -> ResourceNode {
    ResourceNode::new(address)
        .attr("allocation_id", eip.output("id"))
        .attr("subnet_id", subnet.output("id"))
        .attr("tags", tags)
        .replace_on_change("subnet_id")
        .create_before_destroy()
}
