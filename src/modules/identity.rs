// Copyright (c) 2025 - Cowboy AI, Inc.
//! Identity & Access Layer
//!
//! One workload principal per capability group, each with the minimal
//! statement set for that capability scoped to the ARNs supplied.
//!
//! # Capability Matrix
//!
//! | Role | Policy | Scoped to |
//! |---|---|---|
//! | task execution | `execution_registry` | registry ARNs |
//! | task execution | `execution_logs` | log group ARNs |
//! | task execution | `execution_secrets` | secret bundle ARNs |
//! | task runtime | `runtime_secrets` | runtime secret ARNs |
//! | CI/CD | `cicd_registry` | registry ARNs |
//! | CI/CD | `cicd_deploy` | orchestrator ARNs + the two task roles |
//!
//! A policy (and its attachment) is omitted when its ARN list is empty.
//!
//! # Wildcards
//!
//! Scoped lists never accept `*`. The single exception is
//! `ecr:GetAuthorizationToken`, which cannot be resource-scoped; it is
//! emitted with resource `*` only alongside a non-empty registry list.

use serde::{Deserialize, Serialize};

use super::{assume_role_policy, policy_document, ModuleContext, PolicyStatement, Toggle};
use crate::domain::invariants::validate_no_wildcards;
use crate::domain::{Arn, ResourceKind, ValidationError};
use crate::errors::TopologyResult;
use crate::graph::{AttributeValue, ModuleScope, NodeAddress, ResourceGraph, ResourceNode};

pub const MODULE: &str = "identity";

/// The one action allowed an unscoped resource
pub const REGISTRY_AUTH_ACTION: &str = "ecr:GetAuthorizationToken";

const PULL_ACTIONS: &[&str] = &[
    "ecr:BatchCheckLayerAvailability",
    "ecr:BatchGetImage",
    "ecr:GetDownloadUrlForLayer",
];

const PUSH_ACTIONS: &[&str] = &[
    "ecr:BatchCheckLayerAvailability",
    "ecr:BatchGetImage",
    "ecr:CompleteLayerUpload",
    "ecr:InitiateLayerUpload",
    "ecr:PutImage",
    "ecr:UploadLayerPart",
];

/// Workload principals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkloadRole {
    TaskExecution,
    TaskRuntime,
    CiCd,
}

impl WorkloadRole {
    pub fn slug(&self) -> &'static str {
        match self {
            Self::TaskExecution => "task_execution",
            Self::TaskRuntime => "task_runtime",
            Self::CiCd => "cicd",
        }
    }

    fn name_suffix(&self) -> &'static str {
        match self {
            Self::TaskExecution => "task-execution",
            Self::TaskRuntime => "task",
            Self::CiCd => "cicd",
        }
    }
}

/// Address of a workload role, readable before this module is built
pub fn role_address(role: WorkloadRole) -> NodeAddress {
    NodeAddress::new(MODULE, ResourceKind::IamRole, role.slug())
}

/// ARN reference of a workload role
pub fn role_arn(role: WorkloadRole) -> AttributeValue {
    role_address(role).output("arn")
}

/// CI/CD principal configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiCdConfig {
    /// Principal allowed to assume the pipeline role
    pub trusted_principal: Arn,
}

/// Identity input contract: target ARN lists per capability
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdentityInput {
    pub registry_arns: Vec<AttributeValue>,
    pub log_group_arns: Vec<AttributeValue>,
    pub secret_arns: Vec<AttributeValue>,
    pub runtime_secret_arns: Vec<AttributeValue>,
    pub orchestrator_arns: Vec<AttributeValue>,
    pub ci_cd: Toggle<CiCdConfig>,
}

impl IdentityInput {
    pub fn validate(&self) -> TopologyResult<()> {
        for (field, list) in [
            ("identity.registry_arns", &self.registry_arns),
            ("identity.log_group_arns", &self.log_group_arns),
            ("identity.secret_arns", &self.secret_arns),
            ("identity.runtime_secret_arns", &self.runtime_secret_arns),
            ("identity.orchestrator_arns", &self.orchestrator_arns),
        ] {
            for value in list {
                check_scoped(field, value)?;
            }
        }
        Ok(())
    }
}

/// A scoped resource is a concrete ARN or a reference to one
fn check_scoped(field: &str, value: &AttributeValue) -> TopologyResult<()> {
    match value {
        AttributeValue::String(s) => {
            validate_no_wildcards([s.as_str()])?;
            Arn::new(s.as_str()).map_err(ValidationError::from)?;
        }
        AttributeValue::Ref(_) => {}
        AttributeValue::Concat(parts) => {
            validate_no_wildcards(parts.iter().filter_map(AttributeValue::as_str))?;
        }
        other => {
            return Err(ValidationError::invalid(field, format!("not an ARN: {:?}", other)).into());
        }
    }
    Ok(())
}

/// Identity outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityOutputs {
    pub task_execution_role_arn: AttributeValue,
    pub task_role_arn: AttributeValue,
    pub ci_cd_role_arn: Option<AttributeValue>,
    /// Policy addresses actually emitted
    pub policies: Vec<NodeAddress>,
}

/// Build the identity layer
pub fn build(
    graph: &mut ResourceGraph,
    ctx: &ModuleContext,
    input: &IdentityInput,
) -> TopologyResult<IdentityOutputs> {
    input.validate()?;

    let mut scope = graph.module(MODULE);
    let mut policies = Vec::new();

    let execution = add_role(&mut scope, ctx, WorkloadRole::TaskExecution, assume_role_policy("ecs-tasks.amazonaws.com"));
    let runtime = add_role(&mut scope, ctx, WorkloadRole::TaskRuntime, assume_role_policy("ecs-tasks.amazonaws.com"));

    if !input.registry_arns.is_empty() {
        policies.push(attach(
            &mut scope,
            ctx,
            &execution,
            "execution_registry",
            &[
                PolicyStatement::allow("PullImages", PULL_ACTIONS, input.registry_arns.clone()),
                registry_auth_statement(),
            ],
        ));
    }
    if !input.log_group_arns.is_empty() {
        policies.push(attach(
            &mut scope,
            ctx,
            &execution,
            "execution_logs",
            &[PolicyStatement::allow(
                "ShipLogs",
                &["logs:CreateLogStream", "logs:PutLogEvents"],
                input.log_group_arns.clone(),
            )],
        ));
    }
    if !input.secret_arns.is_empty() {
        policies.push(attach(
            &mut scope,
            ctx,
            &execution,
            "execution_secrets",
            &[PolicyStatement::allow(
                "InjectSecrets",
                &["secretsmanager:GetSecretValue"],
                input.secret_arns.clone(),
            )],
        ));
    }
    if !input.runtime_secret_arns.is_empty() {
        policies.push(attach(
            &mut scope,
            ctx,
            &runtime,
            "runtime_secrets",
            &[PolicyStatement::allow(
                "ReadSecrets",
                &["secretsmanager:DescribeSecret", "secretsmanager:GetSecretValue"],
                input.runtime_secret_arns.clone(),
            )],
        ));
    }

    let ci_cd_role_arn = match &input.ci_cd {
        Toggle::Enabled(config) => Some(scope.subtree("ci_cd", |scope| -> TopologyResult<AttributeValue> {
            let trust = AttributeValue::json(AttributeValue::map([
                ("Version", "2012-10-17".into()),
                (
                    "Statement",
                    AttributeValue::list([AttributeValue::map([
                        ("Effect", "Allow".into()),
                        ("Action", "sts:AssumeRole".into()),
                        (
                            "Principal",
                            AttributeValue::map([("AWS", config.trusted_principal.as_str().into())]),
                        ),
                    ])]),
                ),
            ]));
            let role = add_role(scope, ctx, WorkloadRole::CiCd, trust);

            if !input.registry_arns.is_empty() {
                policies.push(attach(
                    scope,
                    ctx,
                    &role,
                    "cicd_registry",
                    &[
                        PolicyStatement::allow("PushImages", PUSH_ACTIONS, input.registry_arns.clone()),
                        registry_auth_statement(),
                    ],
                ));
            }
            if !input.orchestrator_arns.is_empty() {
                policies.push(attach(
                    scope,
                    ctx,
                    &role,
                    "cicd_deploy",
                    &[
                        PolicyStatement::allow(
                            "RollService",
                            &["ecs:DescribeServices", "ecs:UpdateService"],
                            input.orchestrator_arns.clone(),
                        ),
                        PolicyStatement::allow(
                            "PassTaskRoles",
                            &["iam:PassRole"],
                            vec![execution.output("arn"), runtime.output("arn")],
                        ),
                    ],
                ));
            }
            Ok(role.output("arn"))
        })?),
        Toggle::Disabled => None,
    };

    let outputs = IdentityOutputs {
        task_execution_role_arn: execution.output("arn"),
        task_role_arn: runtime.output("arn"),
        ci_cd_role_arn,
        policies,
    };
    scope.output("task_execution_role_arn", outputs.task_execution_role_arn.clone());
    scope.output("task_role_arn", outputs.task_role_arn.clone());
    if let Some(arn) = &outputs.ci_cd_role_arn {
        scope.output("ci_cd_role_arn", arn.clone());
    }
    scope.finish()?;

    Ok(outputs)
}

fn registry_auth_statement() -> PolicyStatement {
    PolicyStatement::allow("RegistryAuth", &[REGISTRY_AUTH_ACTION], vec!["*".into()])
}

fn add_role(
    scope: &mut ModuleScope<'_>,
    ctx: &ModuleContext,
    role: WorkloadRole,
    trust: AttributeValue,
) -> NodeAddress {
    let name = ctx.resource_name(role.name_suffix());
    scope.add(
        ResourceNode::new(role_address(role))
            .attr("name", name.as_str())
            .attr("assume_role_policy", trust)
            .attr("tags", ctx.tags(&name))
            .replace_on_change("name"),
    )
}

fn attach(
    scope: &mut ModuleScope<'_>,
    ctx: &ModuleContext,
    role: &NodeAddress,
    name: &str,
    statements: &[PolicyStatement],
) -> NodeAddress {
    let policy = scope.add(
        ResourceNode::new(scope.address(ResourceKind::IamPolicy, name))
            .attr("name", ctx.resource_name(&name.replace('_', "-")))
            .attr("policy", policy_document(statements))
            .replace_on_change("name"),
    );
    scope.add(
        ResourceNode::new(scope.address(ResourceKind::IamRolePolicyAttachment, name))
            .attr("role", role.output("name"))
            .attr("policy_arn", policy.output("arn")),
    );
    policy
}
