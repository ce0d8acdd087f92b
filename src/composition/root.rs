// Copyright (c) 2025 - Cowboy AI, Inc.
//! Composition Root
//!
//! Assembles module inputs from the parameter set, instantiates the modules
//! in dependency order, and republishes selected outputs. No logic beyond
//! parameter assembly and output re-export lives here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::params::EnvironmentParameters;
use crate::domain::{EnvironmentName, ValidationError};
use crate::errors::TopologyResult;
use crate::graph::{AttributeValue, ResourceGraph};
use crate::modules::identity::{self, WorkloadRole};
use crate::modules::{cache, compute, ingress, network, registry, secrets, state_backend};
use crate::modules::ModuleContext;

/// Environment key the bootstrap graph's state lives under
pub const BOOTSTRAP_ENVIRONMENT: &str = "bootstrap";

/// A republished module output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootOutput {
    /// Module whose nodes must all be created before this resolves
    pub module: String,
    pub value: AttributeValue,
    pub description: String,
}

/// Outputs consumed by the application process and the image pipeline
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompositionOutputs {
    pub values: BTreeMap<String, RootOutput>,
}

impl CompositionOutputs {
    fn publish(&mut self, name: &str, module: &str, value: AttributeValue, description: &str) {
        self.values.insert(
            name.to_string(),
            RootOutput {
                module: module.to_string(),
                value,
                description: description.to_string(),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&RootOutput> {
        self.values.get(name)
    }
}

/// A fully wired environment graph
#[derive(Debug, Clone)]
pub struct Composition {
    pub environment: EnvironmentName,
    pub graph: ResourceGraph,
    pub outputs: CompositionOutputs,
}

/// Instantiate every module for one environment
pub fn compose(params: &EnvironmentParameters) -> TopologyResult<Composition> {
    params.validate()?;

    let ctx = params.context();
    let mut graph = ResourceGraph::new();
    let mut outputs = CompositionOutputs::default();

    let net = network::build(
        &mut graph,
        &ctx,
        &network::NetworkInput {
            cidr: params.network.cidr,
            zones: params.network.zones.clone(),
            public_subnets: params.network.public_subnets.clone(),
            private_subnets: params.network.private_subnets.clone(),
            nat_mode: params.network.nat_mode,
            enable_vpc_endpoints: params.network.enable_vpc_endpoints,
        },
    )?;

    let reg = registry::build(
        &mut graph,
        &ctx,
        &registry::RegistryInput {
            repository_name: params.repository_name(),
            tag_mutability: params.registry.tag_mutability,
            scan_on_push: params.registry.scan_on_push,
            max_image_count: params.registry.max_image_count,
            pull_principals: vec![identity::role_arn(WorkloadRole::TaskExecution)],
        },
    )?;

    let secret_name = ctx.resource_name("credentials");
    let sec = secrets::build(
        &mut graph,
        &ctx,
        &secrets::SecretsInput {
            name: secret_name,
            description: params
                .secrets
                .description
                .clone()
                .unwrap_or_else(|| format!("Webhook credentials for {}", ctx.prefix())),
            fields: params.sensitive.clone(),
            recovery_window_days: params.secret_recovery_window_days(),
        },
    )?;

    let mut peers = vec![compute::service_security_group_address().output("id")];
    peers.extend(
        params
            .cache
            .extra_peer_security_groups
            .iter()
            .map(AttributeValue::from),
    );
    let cache_out = cache::build(
        &mut graph,
        &ctx,
        &cache::CacheInput {
            vpc_id: net.vpc_id.clone(),
            subnet_ids: net.private_subnet_ids.clone(),
            node_type: params.cache.node_type.clone(),
            num_cache_clusters: params.cache.num_cache_clusters,
            engine_version: params.cache.engine_version.clone(),
            parameter_group_family: params.cache.parameter_group_family.clone(),
            port: params.cache.port,
            allowed_peers: peers,
            snapshot_retention_days: params.cache.snapshot_retention_days,
        },
    )?;

    let mut secret_env = BTreeMap::new();
    for (variable, field) in &params.compute.secret_environment {
        secret_env.insert(variable.clone(), sec.reference(variable, field)?);
    }
    let compute_out = compute::build(
        &mut graph,
        &ctx,
        &compute::ComputeInput {
            vpc_id: net.vpc_id.clone(),
            vpc_cidr: net.vpc_cidr,
            private_subnet_ids: net.private_subnet_ids.clone(),
            image: AttributeValue::concat([
                reg.repository_url.clone(),
                format!(":{}", params.compute.image_tag).into(),
            ]),
            cpu: params.compute.cpu,
            memory: params.compute.memory,
            container_port: params.compute.container_port,
            desired_count: params.compute.desired_count,
            health_check: params.compute.health_check.clone(),
            health_check_grace_period_seconds: params.compute.health_check_grace_period_seconds,
            log_retention_days: params.compute.log_retention_days,
            environment: params.compute.environment.clone(),
            secrets: secret_env,
            execution_role_arn: identity::role_arn(WorkloadRole::TaskExecution),
            task_role_arn: identity::role_arn(WorkloadRole::TaskRuntime),
            autoscaling: params.compute.autoscaling.clone(),
        },
    )?;

    let ing = ingress::build(
        &mut graph,
        &ctx,
        &ingress::IngressInput {
            webhook_path: params.ingress.webhook_path.clone(),
            stage_name: params.stage_name(),
            signature_header: params.ingress.signature_header.clone(),
            load_balancer_arn: compute_out.load_balancer_arn.clone(),
            load_balancer_dns_name: compute_out.load_balancer_dns_name.clone(),
            listener_port: compute::LISTENER_PORT,
            access_log_retention_days: params.ingress.access_log_retention_days,
            throttling: params.ingress.throttling,
            secret_bundle_arn: sec.bundle_arn.clone(),
            authorizer: params.ingress.authorizer.clone(),
            protection: params.ingress.protection.clone(),
            custom_domain: params.ingress.custom_domain.clone(),
        },
    )?;

    let ids = identity::build(
        &mut graph,
        &ctx,
        &identity::IdentityInput {
            registry_arns: vec![reg.repository_arn.clone()],
            log_group_arns: vec![compute_out.log_group_arn.clone()],
            secret_arns: if params.compute.secret_environment.is_empty() {
                Vec::new()
            } else {
                vec![sec.bundle_arn.clone()]
            },
            runtime_secret_arns: if params.identity.runtime_secret_access {
                vec![sec.bundle_arn.clone()]
            } else {
                Vec::new()
            },
            orchestrator_arns: vec![compute_out.service_arn.clone()],
            ci_cd: params.identity.ci_cd.clone(),
        },
    )?;

    graph.validate()?;

    outputs.publish("vpc_id", network::MODULE, net.vpc_id, "Network identifier");
    outputs.publish(
        "private_subnet_ids",
        network::MODULE,
        AttributeValue::List(net.private_subnet_ids),
        "Private placement subnets",
    );
    outputs.publish(
        "public_subnet_ids",
        network::MODULE,
        AttributeValue::List(net.public_subnet_ids),
        "Public subnets",
    );
    outputs.publish(
        "repository_url",
        registry::MODULE,
        reg.repository_url,
        "Image registry URL for the pipeline",
    );
    outputs.publish(
        "secret_arn",
        secrets::MODULE,
        sec.bundle_arn,
        "Credential bundle ARN (fields resolved by the orchestrator at container start)",
    );
    outputs.publish(
        "cache_endpoint",
        cache::MODULE,
        cache_out.primary_endpoint,
        "Cache primary endpoint",
    );
    outputs.publish(
        "cache_port",
        cache::MODULE,
        cache_out.port.value().into(),
        "Cache service port",
    );
    outputs.publish(
        "load_balancer_dns_name",
        compute::MODULE,
        compute_out.load_balancer_dns_name,
        "Internal load balancer DNS name",
    );
    outputs.publish("cluster_arn", compute::MODULE, compute_out.cluster_arn, "Container cluster");
    outputs.publish("webhook_url", ingress::MODULE, ing.webhook_url, "Webhook invocation URL");
    if let Some(arn) = ing.web_acl_arn {
        outputs.publish("web_acl_arn", ingress::MODULE, arn, "Protective layer ACL");
    }
    outputs.publish(
        "task_execution_role_arn",
        identity::MODULE,
        ids.task_execution_role_arn,
        "Task execution principal",
    );
    if let Some(arn) = ids.ci_cd_role_arn {
        outputs.publish("ci_cd_role_arn", identity::MODULE, arn, "Pipeline principal");
    }

    Ok(Composition {
        environment: params.environment.clone(),
        graph,
        outputs,
    })
}

/// Graph for the state bucket and lock table
pub fn compose_bootstrap(params: &EnvironmentParameters) -> TopologyResult<Composition> {
    let environment = EnvironmentName::new(BOOTSTRAP_ENVIRONMENT).map_err(ValidationError::from)?;
    let ctx = ModuleContext {
        environment: environment.clone(),
        ..params.context()
    };

    let mut graph = ResourceGraph::new();
    let out = state_backend::build(
        &mut graph,
        &ctx,
        &state_backend::StateBackendInput {
            bucket_name: params.state_backend.bucket_name.clone(),
            lock_table_name: params.state_backend.lock_table_name.clone(),
        },
    )?;
    graph.validate()?;

    let mut outputs = CompositionOutputs::default();
    outputs.publish("state_bucket_arn", state_backend::MODULE, out.bucket_arn, "State record bucket");
    outputs.publish("lock_table_arn", state_backend::MODULE, out.lock_table_arn, "Exclusive lock table");

    Ok(Composition {
        environment,
        graph,
        outputs,
    })
}

impl Composition {
    /// Whether an optional feature was instantiated in a module
    pub fn has_feature(&self, module: &str, feature: &str) -> bool {
        self.graph
            .module_record(module)
            .map(|record| record.has_feature(feature))
            .unwrap_or(false)
    }
}

/// Toggle state summary used by `validate` and `plan` headers
pub fn feature_summary(params: &EnvironmentParameters) -> BTreeMap<&'static str, bool> {
    BTreeMap::from([
        ("autoscaling", params.compute.autoscaling.is_enabled()),
        ("authorizer", params.ingress.authorizer.is_enabled()),
        ("protection", params.ingress.protection.is_enabled()),
        ("custom_domain", params.ingress.custom_domain.is_enabled()),
        ("vpc_endpoints", params.network.enable_vpc_endpoints),
        ("ci_cd", params.identity.ci_cd.is_enabled()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::fixtures;
    use crate::domain::ResourceKind;
    use crate::graph::NodeAddress;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dev_composition_validates() {
        let composition = compose(&fixtures::dev()).unwrap();
        assert!(composition.graph.validate().is_ok());
        assert!(composition.graph.topological_order().is_ok());
        assert_eq!(composition.environment.as_str(), "dev");
    }

    #[test]
    fn test_dev_has_no_scaling_nodes() {
        let composition = compose(&fixtures::dev()).unwrap();
        assert_eq!(composition.graph.count_of(ResourceKind::ScalableTarget), 0);
        assert_eq!(composition.graph.count_of(ResourceKind::ScalingPolicy), 0);
        assert!(!composition.has_feature(compute::MODULE, "autoscaling"));
    }

    #[test]
    fn test_cache_peer_is_compute_service() {
        let composition = compose(&fixtures::dev()).unwrap();
        let peer = composition
            .graph
            .node(&NodeAddress::indexed(cache::MODULE, ResourceKind::SecurityGroupRule, "peer", 0))
            .unwrap();
        assert!(peer
            .references()
            .contains(&compute::service_security_group_address()));
    }

    #[test]
    fn test_modules_registered_in_order() {
        let composition = compose(&fixtures::dev()).unwrap();
        let names: Vec<&str> = composition.graph.modules().map(|m| m.name.as_str()).collect();
        for module in [
            network::MODULE,
            registry::MODULE,
            secrets::MODULE,
            cache::MODULE,
            compute::MODULE,
            ingress::MODULE,
            identity::MODULE,
        ] {
            assert!(names.contains(&module), "missing module {}", module);
        }
    }

    #[test]
    fn test_outputs_published() {
        let composition = compose(&fixtures::dev()).unwrap();
        for name in [
            "load_balancer_dns_name",
            "cache_endpoint",
            "webhook_url",
            "secret_arn",
            "repository_url",
        ] {
            assert!(composition.outputs.get(name).is_some(), "missing output {}", name);
        }
        assert!(composition.outputs.get("web_acl_arn").is_none());
        assert!(composition.outputs.get("ci_cd_role_arn").is_none());
    }

    #[test]
    fn test_invalid_parameters_build_nothing() {
        let mut params = fixtures::dev();
        params.compute.cpu = 300;
        assert!(matches!(
            compose(&params),
            Err(crate::errors::TopologyError::ContractViolation(_))
        ));
    }

    #[test]
    fn test_bootstrap_graph_is_separate() {
        let composition = compose_bootstrap(&fixtures::dev()).unwrap();
        assert_eq!(composition.environment.as_str(), BOOTSTRAP_ENVIRONMENT);
        assert_eq!(composition.graph.count_of(ResourceKind::LockTable), 1);
        assert!(composition.graph.module_record(network::MODULE).is_none());
    }
}
