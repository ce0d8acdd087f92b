// Copyright (c) 2025 - Cowboy AI, Inc.
//! Compute & Load-Balancing Tier
//!
//! A container cluster running one service behind an internal load balancer,
//! with a rolling deployment guarded by a circuit breaker and optional
//! target-tracking autoscaling.
//!
//! # Node Layout
//!
//! ```text
//! cluster ──┐
//! log_group ─> task_definition ─┐
//! load_balancer ─> listener ····> service   (service-after-listener)
//! target_group ──┴──────────────┘   │
//!                                   └─> scalable_target ─> scaling_policy.{cpu,memory}
//! ```
//!
//! # Externally Owned
//!
//! - `service.task_definition`: the deployment pipeline registers revisions
//! - `service.desired_count`: owned by the autoscaler when autoscaling is on

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{ModuleContext, Toggle};
use crate::domain::invariants::{
    validate_log_retention, validate_scaling_bounds, validate_target_utilization, validate_task_shape,
};
use crate::domain::{Ipv4Cidr, Port, ResourceKind, ValidationError};
use crate::errors::TopologyResult;
use crate::graph::{AttributeValue, NodeAddress, ResourceGraph, ResourceNode};

pub const MODULE: &str = "compute";

/// Named ordering: the service must not start before its listener exists
pub const SERVICE_AFTER_LISTENER: &str = "service-after-listener";

pub const CONTAINER_NAME: &str = "app";
pub const LISTENER_PORT: u16 = 80;
pub const MIN_HEALTHY_PERCENT: u32 = 100;
pub const MAX_PERCENT: u32 = 200;

/// Address of the service security group, readable before this module is built
pub fn service_security_group_address() -> NodeAddress {
    NodeAddress::new(MODULE, ResourceKind::SecurityGroup, "service")
}

/// Target-group health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub path: String,
    #[serde(default = "default_interval")]
    pub interval_seconds: u32,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u32,
    #[serde(default = "default_threshold")]
    pub healthy_threshold: u32,
    #[serde(default = "default_threshold")]
    pub unhealthy_threshold: u32,
    #[serde(default = "default_matcher")]
    pub matcher: String,
}

fn default_interval() -> u32 {
    30
}

fn default_timeout() -> u32 {
    5
}

fn default_threshold() -> u32 {
    3
}

fn default_matcher() -> String {
    "200-399".to_string()
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            path: "/health".to_string(),
            interval_seconds: default_interval(),
            timeout_seconds: default_timeout(),
            healthy_threshold: default_threshold(),
            unhealthy_threshold: default_threshold(),
            matcher: default_matcher(),
        }
    }
}

/// Target-tracking autoscaling bounds and targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Autoscaling {
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub cpu_target_percent: u32,
    pub memory_target_percent: u32,
    #[serde(default = "default_cooldown")]
    pub scale_in_cooldown_seconds: u32,
    #[serde(default = "default_cooldown")]
    pub scale_out_cooldown_seconds: u32,
}

fn default_cooldown() -> u32 {
    60
}

/// Compute tier input contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeInput {
    pub vpc_id: AttributeValue,
    pub vpc_cidr: Ipv4Cidr,
    pub private_subnet_ids: Vec<AttributeValue>,
    pub image: AttributeValue,
    pub cpu: u32,
    pub memory: u32,
    pub container_port: Port,
    pub desired_count: u32,
    pub health_check: HealthCheck,
    pub health_check_grace_period_seconds: u32,
    pub log_retention_days: u32,
    pub environment: BTreeMap<String, String>,
    /// Variable name to `valueFrom` selector
    pub secrets: BTreeMap<String, AttributeValue>,
    pub execution_role_arn: AttributeValue,
    pub task_role_arn: AttributeValue,
    pub autoscaling: Toggle<Autoscaling>,
}

impl ComputeInput {
    pub fn validate(&self) -> TopologyResult<()> {
        validate_task_shape(self.cpu, self.memory)?;
        validate_log_retention(self.log_retention_days)?;
        if !self.health_check.path.starts_with('/') {
            return Err(ValidationError::invalid("compute.health_check.path", "must start with '/'").into());
        }
        if self.health_check.timeout_seconds >= self.health_check.interval_seconds {
            return Err(ValidationError::invalid(
                "compute.health_check.timeout_seconds",
                "must be shorter than the interval",
            )
            .into());
        }
        if self.private_subnet_ids.is_empty() {
            return Err(ValidationError::invalid("compute.private_subnet_ids", "at least one subnet").into());
        }
        for name in self.environment.keys() {
            if self.secrets.contains_key(name) {
                return Err(ValidationError::invalid(
                    format!("compute.environment.{}", name),
                    "declared both as plain and secret variable",
                )
                .into());
            }
        }
        match &self.autoscaling {
            Toggle::Enabled(scaling) => {
                validate_scaling_bounds(scaling.min_capacity, scaling.max_capacity, self.desired_count)?;
                validate_target_utilization(scaling.cpu_target_percent)?;
                validate_target_utilization(scaling.memory_target_percent)?;
            }
            Toggle::Disabled => {
                if self.desired_count == 0 {
                    return Err(ValidationError::invalid("compute.desired_count", "must be at least 1").into());
                }
            }
        }
        Ok(())
    }
}

/// Compute tier outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeOutputs {
    pub cluster_arn: AttributeValue,
    pub service_arn: AttributeValue,
    pub service_security_group_id: AttributeValue,
    pub load_balancer_arn: AttributeValue,
    pub load_balancer_dns_name: AttributeValue,
    pub target_group_arn: AttributeValue,
    pub log_group_arn: AttributeValue,
    pub task_definition_arn: AttributeValue,
}

/// Build the compute tier
pub fn build(
    graph: &mut ResourceGraph,
    ctx: &ModuleContext,
    input: &ComputeInput,
) -> TopologyResult<ComputeOutputs> {
    input.validate()?;

    let mut scope = graph.module(MODULE);
    let container_port = input.container_port.value();

    let cluster_name = ctx.resource_name("cluster");
    let cluster = scope.add(
        ResourceNode::new(scope.address(ResourceKind::ContainerCluster, "this"))
            .attr("name", cluster_name.as_str())
            .attr(
                "setting",
                AttributeValue::map([("containerInsights", "enabled".into())]),
            )
            .attr("tags", ctx.tags(&cluster_name))
            .replace_on_change("name"),
    );

    let log_group_name = format!("/ecs/{}", ctx.prefix());
    let log_group = scope.add(
        ResourceNode::new(scope.address(ResourceKind::LogGroup, "app"))
            .attr("name", log_group_name.as_str())
            .attr("retention_in_days", input.log_retention_days)
            .attr("tags", ctx.tags(&log_group_name))
            .replace_on_change("name"),
    );

    // Security groups: load balancer accepts VPC traffic, service accepts only the balancer
    let lb_sg_name = ctx.resource_name("lb");
    let lb_sg = scope.add(
        ResourceNode::new(scope.address(ResourceKind::SecurityGroup, "load_balancer"))
            .attr("name", lb_sg_name.as_str())
            .attr("description", "Internal load balancer")
            .attr("vpc_id", input.vpc_id.clone())
            .attr("tags", ctx.tags(&lb_sg_name))
            .replace_on_change("name"),
    );
    let svc_sg_name = ctx.resource_name("service");
    let svc_sg = scope.add(
        ResourceNode::new(service_security_group_address())
            .attr("name", svc_sg_name.as_str())
            .attr("description", "Webhook service tasks")
            .attr("vpc_id", input.vpc_id.clone())
            .attr("tags", ctx.tags(&svc_sg_name))
            .replace_on_change("name"),
    );
    scope.add(
        ResourceNode::new(scope.address(ResourceKind::SecurityGroupRule, "lb_ingress"))
            .attr("security_group_id", lb_sg.output("id"))
            .attr("type", "ingress")
            .attr("protocol", "tcp")
            .attr("from_port", LISTENER_PORT)
            .attr("to_port", LISTENER_PORT)
            .attr("cidr_blocks", AttributeValue::list([input.vpc_cidr.as_cidr()])),
    );
    scope.add(
        ResourceNode::new(scope.address(ResourceKind::SecurityGroupRule, "lb_to_service"))
            .attr("security_group_id", lb_sg.output("id"))
            .attr("type", "egress")
            .attr("protocol", "tcp")
            .attr("from_port", container_port)
            .attr("to_port", container_port)
            .attr("source_security_group_id", svc_sg.output("id")),
    );
    scope.add(
        ResourceNode::new(scope.address(ResourceKind::SecurityGroupRule, "service_from_lb"))
            .attr("security_group_id", svc_sg.output("id"))
            .attr("type", "ingress")
            .attr("protocol", "tcp")
            .attr("from_port", container_port)
            .attr("to_port", container_port)
            .attr("source_security_group_id", lb_sg.output("id")),
    );
    scope.add(
        ResourceNode::new(scope.address(ResourceKind::SecurityGroupRule, "service_egress"))
            .attr("security_group_id", svc_sg.output("id"))
            .attr("type", "egress")
            .attr("protocol", "tcp")
            .attr("from_port", 443u16)
            .attr("to_port", 443u16)
            .attr("cidr_blocks", AttributeValue::list(["0.0.0.0/0"])),
    );

    let lb_name = ctx.resource_name("nlb");
    let lb = scope.add(
        ResourceNode::new(scope.address(ResourceKind::LoadBalancer, "this"))
            .attr("name", lb_name.as_str())
            .attr("internal", true)
            .attr("load_balancer_type", "network")
            .attr("subnets", AttributeValue::List(input.private_subnet_ids.clone()))
            .attr("security_groups", AttributeValue::list([lb_sg.output("id")]))
            .attr("enable_cross_zone_load_balancing", true)
            .attr("tags", ctx.tags(&lb_name))
            .replace_on_change("name")
            .replace_on_change("internal")
            .replace_on_change("load_balancer_type"),
    );

    let hc = &input.health_check;
    let tg_name = ctx.resource_name("tg");
    let target_group = scope.add(
        ResourceNode::new(scope.address(ResourceKind::TargetGroup, "app"))
            .attr("name", tg_name.as_str())
            .attr("port", container_port)
            .attr("protocol", "TCP")
            .attr("target_type", "ip")
            .attr("vpc_id", input.vpc_id.clone())
            .attr("deregistration_delay", 30u32)
            .attr(
                "health_check",
                AttributeValue::map([
                    ("protocol", "HTTP".into()),
                    ("path", hc.path.as_str().into()),
                    ("interval", hc.interval_seconds.into()),
                    ("timeout", hc.timeout_seconds.into()),
                    ("healthy_threshold", hc.healthy_threshold.into()),
                    ("unhealthy_threshold", hc.unhealthy_threshold.into()),
                    ("matcher", hc.matcher.as_str().into()),
                ]),
            )
            .attr("tags", ctx.tags(&tg_name))
            .replace_on_change("port")
            .replace_on_change("protocol")
            .replace_on_change("target_type")
            .replace_on_change("vpc_id")
            .create_before_destroy(),
    );

    let listener = scope.add(
        ResourceNode::new(scope.address(ResourceKind::Listener, "tcp"))
            .attr("load_balancer_arn", lb.output("arn"))
            .attr("port", LISTENER_PORT)
            .attr("protocol", "TCP")
            .attr(
                "default_action",
                AttributeValue::map([
                    ("type", "forward".into()),
                    ("target_group_arn", target_group.output("arn")),
                ]),
            ),
    );

    let task_definition = scope.add(
        ResourceNode::new(scope.address(ResourceKind::TaskDefinition, "app"))
            .attr("family", ctx.prefix())
            .attr("cpu", input.cpu)
            .attr("memory", input.memory)
            .attr("network_mode", "awsvpc")
            .attr("requires_compatibilities", AttributeValue::list(["FARGATE"]))
            .attr("execution_role_arn", input.execution_role_arn.clone())
            .attr("task_role_arn", input.task_role_arn.clone())
            .attr(
                "container_definitions",
                container_definitions(ctx, input, &log_group),
            )
            .replace_on_change("container_definitions")
            .replace_on_change("cpu")
            .replace_on_change("memory")
            .replace_on_change("execution_role_arn")
            .replace_on_change("task_role_arn")
            .create_before_destroy(),
    );

    let autoscaled = input.autoscaling.is_enabled();
    let service_name = ctx.resource_name("service");
    let mut service_node = ResourceNode::new(scope.address(ResourceKind::ContainerService, "this"))
        .attr("name", service_name.as_str())
        .attr("cluster", cluster.output("arn"))
        .attr("task_definition", task_definition.output("arn"))
        .attr("desired_count", input.desired_count)
        .attr("launch_type", "FARGATE")
        .attr("deployment_minimum_healthy_percent", MIN_HEALTHY_PERCENT)
        .attr("deployment_maximum_percent", MAX_PERCENT)
        .attr(
            "deployment_circuit_breaker",
            AttributeValue::map([("enable", true.into()), ("rollback", true.into())]),
        )
        .attr(
            "network_configuration",
            AttributeValue::map([
                ("subnets", AttributeValue::List(input.private_subnet_ids.clone())),
                ("security_groups", AttributeValue::list([svc_sg.output("id")])),
                ("assign_public_ip", false.into()),
            ]),
        )
        .attr(
            "load_balancer",
            AttributeValue::map([
                ("target_group_arn", target_group.output("arn")),
                ("container_name", CONTAINER_NAME.into()),
                ("container_port", container_port.into()),
            ]),
        )
        .attr(
            "health_check_grace_period_seconds",
            input.health_check_grace_period_seconds,
        )
        .attr("tags", ctx.tags(&service_name))
        .externally_owned("task_definition")
        .replace_on_change("name")
        .replace_on_change("launch_type");
    if autoscaled {
        service_node = service_node.externally_owned("desired_count");
    }
    let service = scope.add(service_node);
    scope.order(SERVICE_AFTER_LISTENER, listener.clone(), service.clone());

    if let Toggle::Enabled(scaling) = &input.autoscaling {
        scope.subtree("autoscaling", |scope| -> TopologyResult<()> {
            let target = scope.add(
                ResourceNode::new(scope.address(ResourceKind::ScalableTarget, "service"))
                    .attr("service_namespace", "ecs")
                    .attr("scalable_dimension", "ecs:service:DesiredCount")
                    .attr(
                        "resource_id",
                        AttributeValue::concat([
                            "service/".into(),
                            cluster.output("name"),
                            "/".into(),
                            service.output("name"),
                        ]),
                    )
                    .attr("min_capacity", scaling.min_capacity)
                    .attr("max_capacity", scaling.max_capacity)
                    .replace_on_change("resource_id"),
            );

            for (name, metric, target_value) in [
                ("cpu", "ECSServiceAverageCPUUtilization", scaling.cpu_target_percent),
                ("memory", "ECSServiceAverageMemoryUtilization", scaling.memory_target_percent),
            ] {
                scope.add(
                    ResourceNode::new(scope.address(ResourceKind::ScalingPolicy, name))
                        .attr("name", ctx.resource_name(&format!("{}-target", name)))
                        .attr("policy_type", "TargetTrackingScaling")
                        .attr("service_namespace", target.output("service_namespace"))
                        .attr("scalable_dimension", target.output("scalable_dimension"))
                        .attr("resource_id", target.output("resource_id"))
                        .attr(
                            "target_tracking_scaling_policy_configuration",
                            AttributeValue::map([
                                ("predefined_metric_type", metric.into()),
                                ("target_value", target_value.into()),
                                ("scale_in_cooldown", scaling.scale_in_cooldown_seconds.into()),
                                ("scale_out_cooldown", scaling.scale_out_cooldown_seconds.into()),
                            ]),
                        ),
                );
            }
            Ok(())
        })?;
    }

    let outputs = ComputeOutputs {
        cluster_arn: cluster.output("arn"),
        service_arn: service.output("arn"),
        service_security_group_id: svc_sg.output("id"),
        load_balancer_arn: lb.output("arn"),
        load_balancer_dns_name: lb.output("dns_name"),
        target_group_arn: target_group.output("arn"),
        log_group_arn: log_group.output("arn"),
        task_definition_arn: task_definition.output("arn"),
    };
    scope.output("cluster_arn", outputs.cluster_arn.clone());
    scope.output("service_name", service.output("name"));
    scope.output("load_balancer_dns_name", outputs.load_balancer_dns_name.clone());
    scope.output("target_group_arn", outputs.target_group_arn.clone());
    scope.output("service_security_group_id", outputs.service_security_group_id.clone());
    scope.finish()?;

    Ok(outputs)
}

fn container_definitions(
    ctx: &ModuleContext,
    input: &ComputeInput,
    log_group: &NodeAddress,
) -> AttributeValue {
    let environment = input.environment.iter().map(|(name, value)| {
        AttributeValue::map([("name", name.into()), ("value", value.into())])
    });
    let secrets = input.secrets.iter().map(|(name, value_from)| {
        AttributeValue::map([("name", name.into()), ("valueFrom", value_from.clone())])
    });

    AttributeValue::json(AttributeValue::list([AttributeValue::map([
        ("name", CONTAINER_NAME.into()),
        ("image", input.image.clone()),
        ("essential", true.into()),
        (
            "portMappings",
            AttributeValue::list([AttributeValue::map([
                ("containerPort", input.container_port.value().into()),
                ("protocol", "tcp".into()),
            ])]),
        ),
        ("environment", AttributeValue::List(environment.collect())),
        ("secrets", AttributeValue::List(secrets.collect())),
        (
            "logConfiguration",
            AttributeValue::map([
                ("logDriver", "awslogs".into()),
                (
                    "options",
                    AttributeValue::map([
                        ("awslogs-group", log_group.output("name")),
                        ("awslogs-region", ctx.region.as_str().into()),
                        ("awslogs-stream-prefix", CONTAINER_NAME.into()),
                    ]),
                ),
            ]),
        ),
    ])]))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::graph::AttributePolicy;
    use crate::modules::fixtures;
    use pretty_assertions::assert_eq;

    pub fn input(autoscaling: Toggle<Autoscaling>) -> ComputeInput {
        ComputeInput {
            vpc_id: "vpc-123".into(),
            vpc_cidr: Ipv4Cidr::new("10.0.0.0/16").unwrap(),
            private_subnet_ids: vec!["subnet-a".into(), "subnet-b".into()],
            image: "123456789012.dkr.ecr.ap-northeast-1.amazonaws.com/webhook:latest".into(),
            cpu: 256,
            memory: 512,
            container_port: Port::new(8080).unwrap(),
            desired_count: 1,
            health_check: HealthCheck::default(),
            health_check_grace_period_seconds: 60,
            log_retention_days: 14,
            environment: BTreeMap::from([("LOG_LEVEL".to_string(), "info".to_string())]),
            secrets: BTreeMap::from([(
                "CRM_TOKEN".to_string(),
                AttributeValue::from("arn:aws:secretsmanager:ap-northeast-1:123456789012:secret:x:CRM_TOKEN::"),
            )]),
            execution_role_arn: "arn:aws:iam::123456789012:role/exec".into(),
            task_role_arn: "arn:aws:iam::123456789012:role/task".into(),
            autoscaling,
        }
    }

    pub fn scaling() -> Autoscaling {
        Autoscaling {
            min_capacity: 1,
            max_capacity: 4,
            cpu_target_percent: 70,
            memory_target_percent: 80,
            scale_in_cooldown_seconds: 60,
            scale_out_cooldown_seconds: 60,
        }
    }

    fn service(graph: &ResourceGraph) -> &ResourceNode {
        graph
            .node(&NodeAddress::new(MODULE, ResourceKind::ContainerService, "this"))
            .unwrap()
    }

    #[test]
    fn test_autoscaling_disabled_emits_no_scaling_nodes() {
        let mut graph = ResourceGraph::new();
        build(&mut graph, &fixtures::dev(), &input(Toggle::Disabled)).unwrap();

        assert_eq!(graph.count_of(ResourceKind::ScalableTarget), 0);
        assert_eq!(graph.count_of(ResourceKind::ScalingPolicy), 0);
        assert_eq!(service(&graph).policy_for("desired_count"), AttributePolicy::Managed);
    }

    #[test]
    fn test_autoscaling_enabled_emits_target_and_policy_pair() {
        let mut graph = ResourceGraph::new();
        build(&mut graph, &fixtures::dev(), &input(Toggle::Enabled(scaling()))).unwrap();

        assert_eq!(graph.count_of(ResourceKind::ScalableTarget), 1);
        assert_eq!(graph.count_of(ResourceKind::ScalingPolicy), 2);
        assert_eq!(
            service(&graph).policy_for("desired_count"),
            AttributePolicy::ExternallyOwnedAfterCreate
        );
    }

    #[test]
    fn test_service_deployment_safety() {
        let mut graph = ResourceGraph::new();
        build(&mut graph, &fixtures::dev(), &input(Toggle::Disabled)).unwrap();

        let node = service(&graph);
        assert_eq!(
            node.policy_for("task_definition"),
            AttributePolicy::ExternallyOwnedAfterCreate
        );
        let breaker = node.get("deployment_circuit_breaker").unwrap();
        assert_eq!(breaker.get("rollback"), Some(&AttributeValue::Bool(true)));

        let listener = NodeAddress::new(MODULE, ResourceKind::Listener, "tcp");
        assert!(graph
            .ordering()
            .iter()
            .any(|c| c.name == SERVICE_AFTER_LISTENER && c.before == listener && c.after == node.address));
        assert!(graph.dependencies(&node.address).contains(&listener));
    }

    #[test]
    fn test_invalid_shapes_rejected() {
        let mut bad = input(Toggle::Disabled);
        bad.memory = 4096;
        assert!(build(&mut ResourceGraph::new(), &fixtures::dev(), &bad).is_err());

        let mut bad = input(Toggle::Enabled(Autoscaling {
            min_capacity: 2,
            ..scaling()
        }));
        bad.desired_count = 1;
        assert!(build(&mut ResourceGraph::new(), &fixtures::dev(), &bad).is_err());

        let mut bad = input(Toggle::Disabled);
        bad.environment.insert("CRM_TOKEN".to_string(), "plain".to_string());
        assert!(build(&mut ResourceGraph::new(), &fixtures::dev(), &bad).is_err());
    }
}
