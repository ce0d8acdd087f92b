// Copyright (c) 2025 - Cowboy AI, Inc.
//! Resource Kind Taxonomy
//!
//! Every node a module emits carries one of these kinds. The kind decides
//! the canonical address segment, the category used for reporting, and the
//! service namespace its identifiers live in.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Resource kind taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    // Network fabric
    Vpc,
    Subnet,
    InternetGateway,
    ElasticIp,
    NatGateway,
    RouteTable,
    Route,
    RouteTableAssociation,
    VpcEndpoint,
    SecurityGroup,
    SecurityGroupRule,

    // Identity
    IamRole,
    IamPolicy,
    IamRolePolicyAttachment,

    // Registry
    ContainerRepository,
    RepositoryLifecyclePolicy,
    RepositoryPolicy,

    // Secret store
    Secret,
    SecretVersion,

    // Cache tier
    CacheSubnetGroup,
    CacheParameterGroup,
    CacheReplicationGroup,

    // Compute & load balancing
    ContainerCluster,
    LogGroup,
    TaskDefinition,
    ContainerService,
    LoadBalancer,
    TargetGroup,
    Listener,
    ScalableTarget,
    ScalingPolicy,

    // Edge / ingress
    RestApi,
    ApiResource,
    ApiMethod,
    ApiIntegration,
    ApiDeployment,
    ApiStage,
    ApiMethodSettings,
    VpcLink,
    ApiAuthorizer,
    Function,
    FunctionPermission,
    WebAcl,
    WebAclAssociation,
    Certificate,
    CertificateValidation,
    DnsRecord,
    ApiDomainName,
    BasePathMapping,

    // State backend bootstrap
    ObjectBucket,
    BucketVersioning,
    BucketEncryption,
    BucketPublicAccessBlock,
    LockTable,
}

/// Coarse grouping of resource kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceCategory {
    Network,
    Identity,
    Storage,
    Data,
    Compute,
    Edge,
    Observability,
}

impl ResourceKind {
    /// Canonical address segment
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vpc => "vpc",
            Self::Subnet => "subnet",
            Self::InternetGateway => "internet_gateway",
            Self::ElasticIp => "elastic_ip",
            Self::NatGateway => "nat_gateway",
            Self::RouteTable => "route_table",
            Self::Route => "route",
            Self::RouteTableAssociation => "route_table_association",
            Self::VpcEndpoint => "vpc_endpoint",
            Self::SecurityGroup => "security_group",
            Self::SecurityGroupRule => "security_group_rule",
            Self::IamRole => "iam_role",
            Self::IamPolicy => "iam_policy",
            Self::IamRolePolicyAttachment => "iam_role_policy_attachment",
            Self::ContainerRepository => "container_repository",
            Self::RepositoryLifecyclePolicy => "repository_lifecycle_policy",
            Self::RepositoryPolicy => "repository_policy",
            Self::Secret => "secret",
            Self::SecretVersion => "secret_version",
            Self::CacheSubnetGroup => "cache_subnet_group",
            Self::CacheParameterGroup => "cache_parameter_group",
            Self::CacheReplicationGroup => "cache_replication_group",
            Self::ContainerCluster => "container_cluster",
            Self::LogGroup => "log_group",
            Self::TaskDefinition => "task_definition",
            Self::ContainerService => "container_service",
            Self::LoadBalancer => "load_balancer",
            Self::TargetGroup => "target_group",
            Self::Listener => "listener",
            Self::ScalableTarget => "scalable_target",
            Self::ScalingPolicy => "scaling_policy",
            Self::RestApi => "rest_api",
            Self::ApiResource => "api_resource",
            Self::ApiMethod => "api_method",
            Self::ApiIntegration => "api_integration",
            Self::ApiDeployment => "api_deployment",
            Self::ApiStage => "api_stage",
            Self::ApiMethodSettings => "api_method_settings",
            Self::VpcLink => "vpc_link",
            Self::ApiAuthorizer => "api_authorizer",
            Self::Function => "function",
            Self::FunctionPermission => "function_permission",
            Self::WebAcl => "web_acl",
            Self::WebAclAssociation => "web_acl_association",
            Self::Certificate => "certificate",
            Self::CertificateValidation => "certificate_validation",
            Self::DnsRecord => "dns_record",
            Self::ApiDomainName => "api_domain_name",
            Self::BasePathMapping => "base_path_mapping",
            Self::ObjectBucket => "object_bucket",
            Self::BucketVersioning => "bucket_versioning",
            Self::BucketEncryption => "bucket_encryption",
            Self::BucketPublicAccessBlock => "bucket_public_access_block",
            Self::LockTable => "lock_table",
        }
    }

    /// Parse from the canonical address segment
    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|kind| kind.as_str() == s)
    }

    /// Every kind, in declaration order
    pub fn all() -> &'static [ResourceKind] {
        use ResourceKind::*;
        &[
            Vpc, Subnet, InternetGateway, ElasticIp, NatGateway, RouteTable, Route,
            RouteTableAssociation, VpcEndpoint, SecurityGroup, SecurityGroupRule, IamRole,
            IamPolicy, IamRolePolicyAttachment, ContainerRepository, RepositoryLifecyclePolicy,
            RepositoryPolicy, Secret, SecretVersion, CacheSubnetGroup, CacheParameterGroup,
            CacheReplicationGroup, ContainerCluster, LogGroup, TaskDefinition, ContainerService,
            LoadBalancer, TargetGroup, Listener, ScalableTarget, ScalingPolicy, RestApi,
            ApiResource, ApiMethod, ApiIntegration, ApiDeployment, ApiStage, ApiMethodSettings,
            VpcLink, ApiAuthorizer, Function, FunctionPermission, WebAcl, WebAclAssociation,
            Certificate, CertificateValidation, DnsRecord, ApiDomainName, BasePathMapping,
            ObjectBucket, BucketVersioning, BucketEncryption, BucketPublicAccessBlock, LockTable,
        ]
    }

    /// Service namespace identifiers of this kind are issued under
    pub fn service(&self) -> &'static str {
        match self.category() {
            ResourceCategory::Network => "ec2",
            ResourceCategory::Identity => "iam",
            ResourceCategory::Observability => "logs",
            _ => match self {
                Self::ContainerRepository
                | Self::RepositoryLifecyclePolicy
                | Self::RepositoryPolicy => "ecr",
                Self::Secret | Self::SecretVersion => "secretsmanager",
                Self::CacheSubnetGroup
                | Self::CacheParameterGroup
                | Self::CacheReplicationGroup => "elasticache",
                Self::ContainerCluster | Self::TaskDefinition | Self::ContainerService => "ecs",
                Self::LoadBalancer | Self::TargetGroup | Self::Listener => "elasticloadbalancing",
                Self::ScalableTarget | Self::ScalingPolicy => "application-autoscaling",
                Self::Function | Self::FunctionPermission => "lambda",
                Self::WebAcl | Self::WebAclAssociation => "wafv2",
                Self::Certificate | Self::CertificateValidation => "acm",
                Self::DnsRecord => "route53",
                Self::ObjectBucket
                | Self::BucketVersioning
                | Self::BucketEncryption
                | Self::BucketPublicAccessBlock => "s3",
                Self::LockTable => "dynamodb",
                _ => "apigateway",
            },
        }
    }

    /// Get the primary category for this resource kind
    pub fn category(&self) -> ResourceCategory {
        match self {
            Self::Vpc
            | Self::Subnet
            | Self::InternetGateway
            | Self::ElasticIp
            | Self::NatGateway
            | Self::RouteTable
            | Self::Route
            | Self::RouteTableAssociation
            | Self::VpcEndpoint
            | Self::SecurityGroup
            | Self::SecurityGroupRule => ResourceCategory::Network,

            Self::IamRole | Self::IamPolicy | Self::IamRolePolicyAttachment => {
                ResourceCategory::Identity
            }

            Self::ContainerRepository
            | Self::RepositoryLifecyclePolicy
            | Self::RepositoryPolicy
            | Self::Secret
            | Self::SecretVersion
            | Self::ObjectBucket
            | Self::BucketVersioning
            | Self::BucketEncryption
            | Self::BucketPublicAccessBlock
            | Self::LockTable => ResourceCategory::Storage,

            Self::CacheSubnetGroup | Self::CacheParameterGroup | Self::CacheReplicationGroup => {
                ResourceCategory::Data
            }

            Self::ContainerCluster
            | Self::TaskDefinition
            | Self::ContainerService
            | Self::LoadBalancer
            | Self::TargetGroup
            | Self::Listener
            | Self::ScalableTarget
            | Self::ScalingPolicy
            | Self::Function
            | Self::FunctionPermission => ResourceCategory::Compute,

            Self::LogGroup => ResourceCategory::Observability,

            Self::RestApi
            | Self::ApiResource
            | Self::ApiMethod
            | Self::ApiIntegration
            | Self::ApiDeployment
            | Self::ApiStage
            | Self::ApiMethodSettings
            | Self::VpcLink
            | Self::ApiAuthorizer
            | Self::WebAcl
            | Self::WebAclAssociation
            | Self::Certificate
            | Self::CertificateValidation
            | Self::DnsRecord
            | Self::ApiDomainName
            | Self::BasePathMapping => ResourceCategory::Edge,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
