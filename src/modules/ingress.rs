// Copyright (c) 2025 - Cowboy AI, Inc.
//! Edge / Ingress Layer
//!
//! Exposes exactly one external path, `POST <webhook path>`, and proxies it
//! over a private network link to the compute tier's load balancer with the
//! signature header carried end to end.
//!
//! # Optional Sub-Contracts
//!
//! | Feature | Nodes |
//! |---|---|
//! | `authorizer` | role, policy, attachment, log group, function, permission, request authorizer |
//! | `protection` | web ACL (rate + managed rules), stage association |
//! | `custom_domain` | certificate, validation record, validation, domain name, base path mapping, alias record |
//!
//! Each is a [`Toggle`]: disabled means no node at all, not an inactive one.
//! Every stage ships structured access logs and trace correlation.

use serde::{Deserialize, Serialize};

use super::{assume_role_policy, policy_document, ModuleContext, PolicyStatement, Toggle};
use crate::domain::invariants::{validate_log_retention, validate_webhook_path};
use crate::domain::{DomainName, ResourceKind, SecretField, ValidationError};
use crate::errors::TopologyResult;
use crate::graph::{AttributeValue, ModuleScope, NodeAddress, ResourceGraph, ResourceNode};

pub const MODULE: &str = "ingress";

pub const DEFAULT_SIGNATURE_HEADER: &str = "x-works-signature";

/// Structured access log line
pub const ACCESS_LOG_FORMAT: &str = r#"{"requestId":"$context.requestId","ip":"$context.identity.sourceIp","requestTime":"$context.requestTime","httpMethod":"$context.httpMethod","resourcePath":"$context.resourcePath","status":"$context.status","responseLength":"$context.responseLength","integrationLatency":"$context.integrationLatency","xrayTraceId":"$context.xrayTraceId"}"#;

/// Stage-wide throttling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Throttling {
    pub burst_limit: u32,
    pub rate_limit: u32,
}

impl Default for Throttling {
    fn default() -> Self {
        Self {
            burst_limit: 100,
            rate_limit: 50,
        }
    }
}

/// Custom request authorizer backed by a stateless function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizerConfig {
    /// Bundle field holding the shared signing secret
    pub secret_field: SecretField,
    /// Deployment package for the function
    pub package: String,
    #[serde(default = "default_function_memory")]
    pub memory_mb: u32,
    #[serde(default = "default_function_timeout")]
    pub timeout_seconds: u32,
    #[serde(default)]
    pub result_ttl_seconds: u32,
}

fn default_function_memory() -> u32 {
    128
}

fn default_function_timeout() -> u32 {
    5
}

/// Per-source rate ceiling and managed bad-pattern rule groups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionConfig {
    /// Requests per source IP per five-minute window
    pub rate_limit: u32,
    #[serde(default = "default_managed_rules")]
    pub managed_rule_groups: Vec<String>,
}

fn default_managed_rules() -> Vec<String> {
    vec![
        "AWSManagedRulesCommonRuleSet".to_string(),
        "AWSManagedRulesKnownBadInputsRuleSet".to_string(),
        "AWSManagedRulesAmazonIpReputationList".to_string(),
    ]
}

/// DNS-validated custom domain bound to the stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomDomainConfig {
    pub domain_name: DomainName,
    pub hosted_zone_id: String,
    pub hosted_zone_name: String,
}

/// Ingress input contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressInput {
    pub webhook_path: String,
    pub stage_name: String,
    pub signature_header: String,
    pub load_balancer_arn: AttributeValue,
    pub load_balancer_dns_name: AttributeValue,
    pub listener_port: u16,
    pub access_log_retention_days: u32,
    pub throttling: Throttling,
    /// Bundle ARN the authorizer reads its secret from
    pub secret_bundle_arn: AttributeValue,
    pub authorizer: Toggle<AuthorizerConfig>,
    pub protection: Toggle<ProtectionConfig>,
    pub custom_domain: Toggle<CustomDomainConfig>,
}

impl IngressInput {
    pub fn validate(&self) -> TopologyResult<()> {
        validate_webhook_path(&self.webhook_path)?;
        validate_log_retention(self.access_log_retention_days)?;
        if self.stage_name.is_empty()
            || !self.stage_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ValidationError::invalid("ingress.stage_name", "alphanumerics, '-' and '_' only").into());
        }
        if self.signature_header.is_empty()
            || !self.signature_header.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(ValidationError::invalid("ingress.signature_header", "not a valid header name").into());
        }
        if let Toggle::Enabled(protection) = &self.protection {
            if protection.rate_limit < 100 {
                return Err(ValidationError::invalid(
                    "ingress.protection.rate_limit",
                    "provider floor is 100 requests per window",
                )
                .into());
            }
        }
        if let Toggle::Enabled(domain) = &self.custom_domain {
            if !domain.domain_name.is_within(&domain.hosted_zone_name) {
                return Err(ValidationError::DomainOutsideZone {
                    domain: domain.domain_name.to_string(),
                    zone: domain.hosted_zone_name.clone(),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Ingress outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressOutputs {
    pub rest_api_id: AttributeValue,
    pub stage_arn: AttributeValue,
    pub invoke_url: AttributeValue,
    /// Custom-domain URL when bound, otherwise the stage invoke URL
    pub webhook_url: AttributeValue,
    pub web_acl_arn: Option<AttributeValue>,
    pub authorizer_function_arn: Option<AttributeValue>,
}

/// Build the ingress layer
pub fn build(
    graph: &mut ResourceGraph,
    ctx: &ModuleContext,
    input: &IngressInput,
) -> TopologyResult<IngressOutputs> {
    input.validate()?;

    let mut scope = graph.module(MODULE);
    let header = input.signature_header.to_ascii_lowercase();
    let api_name = ctx.resource_name("webhook-api");

    let vpc_link = scope.add(
        ResourceNode::new(scope.address(ResourceKind::VpcLink, "this"))
            .attr("name", ctx.resource_name("link"))
            .attr("target_arns", AttributeValue::list([input.load_balancer_arn.clone()]))
            .replace_on_change("target_arns"),
    );

    let api = scope.add(
        ResourceNode::new(scope.address(ResourceKind::RestApi, "this"))
            .attr("name", api_name.as_str())
            .attr(
                "endpoint_configuration",
                AttributeValue::map([("types", AttributeValue::list(["REGIONAL"]))]),
            )
            .attr("tags", ctx.tags(&api_name)),
    );

    // One resource per path segment
    let mut parent = api.output("root_resource_id");
    let mut last_resource = None;
    for (i, segment) in input.webhook_path.trim_start_matches('/').split('/').enumerate() {
        let resource = scope.add(
            ResourceNode::new(scope.indexed(ResourceKind::ApiResource, "path", i as u32))
                .attr("rest_api_id", api.output("id"))
                .attr("parent_id", parent)
                .attr("path_part", segment)
                .replace_on_change("path_part")
                .replace_on_change("parent_id"),
        );
        parent = resource.output("id");
        last_resource = Some(resource);
    }
    let resource = last_resource.ok_or_else(|| {
        ValidationError::InvalidWebhookPath(input.webhook_path.clone())
    })?;

    let authorizer = match &input.authorizer {
        Toggle::Enabled(config) => Some(scope.subtree("authorizer", |scope| {
            build_authorizer(scope, ctx, input, config, &api, &header)
        })?),
        Toggle::Disabled => None,
    };

    let method_request_header = format!("method.request.header.{}", header);
    let mut method = ResourceNode::new(scope.address(ResourceKind::ApiMethod, "post"))
        .attr("rest_api_id", api.output("id"))
        .attr("resource_id", resource.output("id"))
        .attr("http_method", "POST")
        .attr(
            "request_parameters",
            AttributeValue::map([(method_request_header.as_str(), true.into())]),
        )
        .replace_on_change("http_method");
    method = match &authorizer {
        Some(auth) => method
            .attr("authorization", "CUSTOM")
            .attr("authorizer_id", auth.authorizer.output("id")),
        None => method.attr("authorization", "NONE"),
    };
    let method = scope.add(method);

    let integration = scope.add(
        ResourceNode::new(scope.address(ResourceKind::ApiIntegration, "post"))
            .attr("rest_api_id", api.output("id"))
            .attr("resource_id", resource.output("id"))
            .attr("http_method", method.output("http_method"))
            .attr("type", "HTTP_PROXY")
            .attr("integration_http_method", "POST")
            .attr(
                "uri",
                AttributeValue::concat([
                    "http://".into(),
                    input.load_balancer_dns_name.clone(),
                    format!(":{}{}", input.listener_port, input.webhook_path).into(),
                ]),
            )
            .attr("connection_type", "VPC_LINK")
            .attr("connection_id", vpc_link.output("id"))
            .attr(
                "request_parameters",
                AttributeValue::map([(
                    format!("integration.request.header.{}", header),
                    method_request_header.as_str().into(),
                )]),
            ),
    );

    let deployment = scope.add(
        ResourceNode::new(scope.address(ResourceKind::ApiDeployment, "this"))
            .attr("rest_api_id", api.output("id"))
            .attr(
                "triggers",
                AttributeValue::map([(
                    "redeployment",
                    AttributeValue::json(AttributeValue::list([
                        method.output("id"),
                        integration.output("id"),
                    ])),
                )]),
            )
            .replace_on_change("triggers")
            .create_before_destroy(),
    );

    let access_log_name = format!("/aws/apigateway/{}-access", ctx.prefix());
    let access_logs = scope.add(
        ResourceNode::new(scope.address(ResourceKind::LogGroup, "access"))
            .attr("name", access_log_name.as_str())
            .attr("retention_in_days", input.access_log_retention_days)
            .attr("tags", ctx.tags(&access_log_name))
            .replace_on_change("name"),
    );

    let stage = scope.add(
        ResourceNode::new(scope.address(ResourceKind::ApiStage, "this"))
            .attr("rest_api_id", api.output("id"))
            .attr("deployment_id", deployment.output("id"))
            .attr("stage_name", input.stage_name.as_str())
            .attr("xray_tracing_enabled", true)
            .attr(
                "access_log_settings",
                AttributeValue::map([
                    ("destination_arn", access_logs.output("arn")),
                    ("format", ACCESS_LOG_FORMAT.into()),
                ]),
            )
            .attr("tags", ctx.tags(&api_name))
            .replace_on_change("stage_name"),
    );

    scope.add(
        ResourceNode::new(scope.address(ResourceKind::ApiMethodSettings, "all"))
            .attr("rest_api_id", api.output("id"))
            .attr("stage_name", stage.output("stage_name"))
            .attr("method_path", "*/*")
            .attr(
                "settings",
                AttributeValue::map([
                    ("metrics_enabled", true.into()),
                    ("logging_level", "INFO".into()),
                    ("data_trace_enabled", false.into()),
                    ("throttling_burst_limit", input.throttling.burst_limit.into()),
                    ("throttling_rate_limit", input.throttling.rate_limit.into()),
                ]),
            ),
    );

    let web_acl = match &input.protection {
        Toggle::Enabled(config) => Some(scope.subtree("protection", |scope| {
            build_protection(scope, ctx, config, &stage)
        })?),
        Toggle::Disabled => None,
    };

    let invoke_url = AttributeValue::concat([stage.output("invoke_url"), input.webhook_path.as_str().into()]);
    let webhook_url = match &input.custom_domain {
        Toggle::Enabled(config) => scope.subtree("custom_domain", |scope| {
            build_custom_domain(scope, ctx, config, &api, &stage, &input.webhook_path)
        })?,
        Toggle::Disabled => invoke_url.clone(),
    };

    let outputs = IngressOutputs {
        rest_api_id: api.output("id"),
        stage_arn: stage.output("arn"),
        invoke_url,
        webhook_url,
        web_acl_arn: web_acl.map(|acl| acl.output("arn")),
        authorizer_function_arn: authorizer.map(|auth| auth.function.output("arn")),
    };
    scope.output("rest_api_id", outputs.rest_api_id.clone());
    scope.output("invoke_url", outputs.invoke_url.clone());
    scope.output("webhook_url", outputs.webhook_url.clone());
    if let Some(arn) = &outputs.web_acl_arn {
        scope.output("web_acl_arn", arn.clone());
    }
    scope.finish()?;

    Ok(outputs)
}

struct AuthorizerNodes {
    function: NodeAddress,
    authorizer: NodeAddress,
}

fn build_authorizer(
    scope: &mut ModuleScope<'_>,
    ctx: &ModuleContext,
    input: &IngressInput,
    config: &AuthorizerConfig,
    api: &NodeAddress,
    header: &str,
) -> TopologyResult<AuthorizerNodes> {
    if config.package.is_empty() {
        return Err(ValidationError::invalid("ingress.authorizer.package", "deployment package required").into());
    }

    let function_name = ctx.resource_name("authorizer");
    let log_group = scope.add(
        ResourceNode::new(scope.address(ResourceKind::LogGroup, "authorizer"))
            .attr("name", format!("/aws/lambda/{}", function_name))
            .attr("retention_in_days", input.access_log_retention_days)
            .replace_on_change("name"),
    );

    let role = scope.add(
        ResourceNode::new(scope.address(ResourceKind::IamRole, "authorizer"))
            .attr("name", function_name.as_str())
            .attr("assume_role_policy", assume_role_policy("lambda.amazonaws.com"))
            .attr("tags", ctx.tags(&function_name))
            .replace_on_change("name"),
    );
    let policy = scope.add(
        ResourceNode::new(scope.address(ResourceKind::IamPolicy, "authorizer"))
            .attr("name", format!("{}-access", function_name))
            .attr(
                "policy",
                policy_document(&[
                    PolicyStatement::allow(
                        "ReadSigningSecret",
                        &["secretsmanager:GetSecretValue"],
                        vec![input.secret_bundle_arn.clone()],
                    ),
                    PolicyStatement::allow(
                        "WriteLogs",
                        &["logs:CreateLogStream", "logs:PutLogEvents"],
                        vec![log_group.output("arn")],
                    ),
                ]),
            ),
    );
    scope.add(
        ResourceNode::new(scope.address(ResourceKind::IamRolePolicyAttachment, "authorizer"))
            .attr("role", role.output("name"))
            .attr("policy_arn", policy.output("arn")),
    );

    let function = scope.add(
        ResourceNode::new(scope.address(ResourceKind::Function, "authorizer"))
            .attr("function_name", function_name.as_str())
            .attr("runtime", "provided.al2023")
            .attr("handler", "bootstrap")
            .attr("filename", config.package.as_str())
            .attr("role", role.output("arn"))
            .attr("memory_size", config.memory_mb)
            .attr("timeout", config.timeout_seconds)
            .attr(
                "environment",
                AttributeValue::map([(
                    "variables",
                    AttributeValue::map([
                        ("SECRET_ARN", input.secret_bundle_arn.clone()),
                        ("SECRET_FIELD", config.secret_field.as_str().into()),
                        ("SIGNATURE_HEADER", header.into()),
                    ]),
                )]),
            )
            .attr("logging_config", AttributeValue::map([("log_group", log_group.output("name"))]))
            .replace_on_change("function_name"),
    );

    let authorizer = scope.add(
        ResourceNode::new(scope.address(ResourceKind::ApiAuthorizer, "signature"))
            .attr("name", "signature")
            .attr("rest_api_id", api.output("id"))
            .attr("type", "REQUEST")
            .attr("authorizer_uri", function.output("invoke_arn"))
            .attr("identity_source", format!("method.request.header.{}", header))
            .attr("authorizer_result_ttl_in_seconds", config.result_ttl_seconds),
    );

    scope.add(
        ResourceNode::new(scope.address(ResourceKind::FunctionPermission, "authorizer"))
            .attr("statement_id", "AllowApiGatewayInvoke")
            .attr("action", "lambda:InvokeFunction")
            .attr("function_name", function.output("function_name"))
            .attr("principal", "apigateway.amazonaws.com")
            .attr(
                "source_arn",
                AttributeValue::concat([
                    api.output("execution_arn"),
                    "/authorizers/".into(),
                    authorizer.output("id"),
                ]),
            ),
    );

    Ok(AuthorizerNodes { function, authorizer })
}

fn build_protection(
    scope: &mut ModuleScope<'_>,
    ctx: &ModuleContext,
    config: &ProtectionConfig,
    stage: &NodeAddress,
) -> TopologyResult<NodeAddress> {
    let name = ctx.resource_name("waf");
    let visibility = |metric: &str| {
        AttributeValue::map([
            ("cloudwatch_metrics_enabled", true.into()),
            ("sampled_requests_enabled", true.into()),
            ("metric_name", metric.into()),
        ])
    };

    let mut rules = vec![AttributeValue::map([
        ("name", "per-source-rate-limit".into()),
        ("priority", 0u32.into()),
        ("action", "block".into()),
        (
            "statement",
            AttributeValue::map([(
                "rate_based_statement",
                AttributeValue::map([
                    ("limit", config.rate_limit.into()),
                    ("aggregate_key_type", "IP".into()),
                ]),
            )]),
        ),
        ("visibility_config", visibility("per-source-rate-limit")),
    ])];
    for (i, group) in config.managed_rule_groups.iter().enumerate() {
        rules.push(AttributeValue::map([
            ("name", group.into()),
            ("priority", (i as u32 + 1).into()),
            ("override_action", "none".into()),
            (
                "statement",
                AttributeValue::map([(
                    "managed_rule_group_statement",
                    AttributeValue::map([("vendor_name", "AWS".into()), ("name", group.into())]),
                )]),
            ),
            ("visibility_config", visibility(group)),
        ]));
    }

    let acl = scope.add(
        ResourceNode::new(scope.address(ResourceKind::WebAcl, "this"))
            .attr("name", name.as_str())
            .attr("scope", "REGIONAL")
            .attr("default_action", "allow")
            .attr("rules", AttributeValue::List(rules))
            .attr("visibility_config", visibility(&name))
            .attr("tags", ctx.tags(&name))
            .replace_on_change("name")
            .replace_on_change("scope"),
    );
    scope.add(
        ResourceNode::new(scope.address(ResourceKind::WebAclAssociation, "stage"))
            .attr("resource_arn", stage.output("arn"))
            .attr("web_acl_arn", acl.output("arn"))
            .replace_on_change("resource_arn")
            .replace_on_change("web_acl_arn"),
    );

    Ok(acl)
}

fn build_custom_domain(
    scope: &mut ModuleScope<'_>,
    ctx: &ModuleContext,
    config: &CustomDomainConfig,
    api: &NodeAddress,
    stage: &NodeAddress,
    webhook_path: &str,
) -> TopologyResult<AttributeValue> {
    let domain = config.domain_name.as_str();

    let certificate = scope.add(
        ResourceNode::new(scope.address(ResourceKind::Certificate, "this"))
            .attr("domain_name", domain)
            .attr("validation_method", "DNS")
            .attr("tags", ctx.tags(domain))
            .replace_on_change("domain_name")
            .create_before_destroy(),
    );
    let validation_record = scope.add(
        ResourceNode::new(scope.address(ResourceKind::DnsRecord, "validation"))
            .attr("zone_id", config.hosted_zone_id.as_str())
            .attr("name", certificate.output("validation_record_name"))
            .attr("type", certificate.output("validation_record_type"))
            .attr("records", AttributeValue::list([certificate.output("validation_record_value")]))
            .attr("ttl", 60u32),
    );
    let validation = scope.add(
        ResourceNode::new(scope.address(ResourceKind::CertificateValidation, "this"))
            .attr("certificate_arn", certificate.output("arn"))
            .attr(
                "validation_record_fqdns",
                AttributeValue::list([validation_record.output("fqdn")]),
            ),
    );
    let domain_name = scope.add(
        ResourceNode::new(scope.address(ResourceKind::ApiDomainName, "this"))
            .attr("domain_name", domain)
            .attr("regional_certificate_arn", validation.output("certificate_arn"))
            .attr("security_policy", "TLS_1_2")
            .attr(
                "endpoint_configuration",
                AttributeValue::map([("types", AttributeValue::list(["REGIONAL"]))]),
            )
            .replace_on_change("domain_name"),
    );
    scope.add(
        ResourceNode::new(scope.address(ResourceKind::BasePathMapping, "this"))
            .attr("api_id", api.output("id"))
            .attr("stage_name", stage.output("stage_name"))
            .attr("domain_name", domain_name.output("domain_name")),
    );
    scope.add(
        ResourceNode::new(scope.address(ResourceKind::DnsRecord, "alias"))
            .attr("zone_id", config.hosted_zone_id.as_str())
            .attr("name", domain)
            .attr("type", "A")
            .attr(
                "alias",
                AttributeValue::map([
                    ("name", domain_name.output("regional_domain_name")),
                    ("zone_id", domain_name.output("regional_zone_id")),
                    ("evaluate_target_health", false.into()),
                ]),
            ),
    );

    scope.output("custom_domain", domain);
    Ok(AttributeValue::string(format!("https://{}{}", domain, webhook_path)))
}
