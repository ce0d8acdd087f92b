// Copyright (c) 2025 - Cowboy AI, Inc.
//! Simulated Provider
//!
//! A deterministic in-memory control plane. Identifiers derive from the node
//! address and its creation generation, so two runs over the same graph
//! produce the same identifiers regardless of scheduling order.
//!
//! Besides plain bookkeeping it models the parts of the platform the
//! topology's guarantees depend on:
//!
//! - **Fault injection**: any address can be made to reject operations
//! - **Drift injection**: live attributes can be changed out of band
//! - **Services**: every service create or update runs a rolling deployment
//!   through the circuit breaker; running tasks follow its outcome
//! - **Target groups**: registered targets are the running tasks of the
//!   services forwarding to them

use async_trait::async_trait;
use ring::digest;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{AttributeMap, Operation, Provider};
use crate::domain::ResourceKind;
use crate::errors::{TopologyError, TopologyResult};
use crate::graph::NodeAddress;
use crate::state_machine::deployment::{
    failure_threshold, Deployment, DeploymentEvent, DeploymentOutcome,
};
use crate::state_machine::TrackedMachine;

pub const DEFAULT_ACCOUNT: &str = "123456789012";
pub const DEFAULT_REGION: &str = "ap-northeast-1";

/// Regional hosted zone the API domain aliases point at
const API_REGIONAL_ZONE_ID: &str = "Z1YSHQZHG15GKL";

/// One call the provider received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedOperation {
    pub operation: Operation,
    pub address: NodeAddress,
}

#[derive(Debug, Clone)]
struct LiveResource {
    address: NodeAddress,
    attributes: AttributeMap,
    outputs: AttributeMap,
}

#[derive(Debug, Default)]
struct Inner {
    /// Live resources keyed by id
    resources: BTreeMap<String, LiveResource>,
    generations: BTreeMap<NodeAddress, u64>,
    rejections: BTreeMap<NodeAddress, String>,
    task_failures: BTreeMap<NodeAddress, u32>,
    running: BTreeMap<NodeAddress, u32>,
    deployments: BTreeMap<NodeAddress, TrackedMachine<Deployment>>,
    operations: Vec<RecordedOperation>,
}

impl Inner {
    fn live_by_address(&self, address: &NodeAddress) -> Option<&LiveResource> {
        self.resources.values().find(|r| &r.address == address)
    }

    fn running_for_target_group(&self, target_group_arn: &str) -> u32 {
        self.resources
            .values()
            .filter(|r| r.address.kind == ResourceKind::ContainerService)
            .filter(|r| {
                r.attributes
                    .get("load_balancer")
                    .and_then(|lb| lb.get("target_group_arn"))
                    .and_then(Value::as_str)
                    == Some(target_group_arn)
            })
            .map(|r| self.running.get(&r.address).copied().unwrap_or(0))
            .sum()
    }
}

/// Deterministic in-memory provider
#[derive(Debug)]
pub struct SimulatedProvider {
    account: String,
    region: String,
    inner: Mutex<Inner>,
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new(DEFAULT_REGION)
    }
}

impl SimulatedProvider {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            account: DEFAULT_ACCOUNT.to_string(),
            region: region.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Rebuild live resources from a state record
    ///
    /// Lets the CLI plan against a provider that "already has" what state
    /// says was applied.
    pub fn from_state(region: impl Into<String>, record: &crate::state::StateRecord) -> Self {
        let mut inner = Inner::default();
        for (address, resource) in &record.resources {
            if let Some(id) = resource.id() {
                inner.resources.insert(
                    id.to_string(),
                    LiveResource {
                        address: address.clone(),
                        attributes: resource.applied.clone(),
                        outputs: resource.outputs.clone(),
                    },
                );
                inner.generations.insert(address.clone(), 1);
                if address.kind == ResourceKind::ContainerService {
                    let desired = desired_count(&resource.applied);
                    inner.running.insert(address.clone(), desired);
                }
            }
        }
        Self {
            inner: Mutex::new(inner),
            ..Self::new(region)
        }
    }

    /// Reject every future operation on `address`
    pub async fn reject(&self, address: &NodeAddress, reason: impl Into<String>) {
        self.inner
            .lock()
            .await
            .rejections
            .insert(address.clone(), reason.into());
    }

    pub async fn clear_rejection(&self, address: &NodeAddress) {
        self.inner.lock().await.rejections.remove(address);
    }

    /// Make the next deployment of a service see `count` failed task launches
    pub async fn fail_task_launches(&self, service: &NodeAddress, count: u32) {
        self.inner
            .lock()
            .await
            .task_failures
            .insert(service.clone(), count);
    }

    /// Change a live attribute out of band; false if the node does not exist
    pub async fn drift(&self, address: &NodeAddress, key: &str, value: Value) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.resources.values_mut().find(|r| &r.address == address) {
            Some(resource) => {
                resource.attributes.insert(key.to_string(), value);
                true
            }
            None => false,
        }
    }

    /// Delete a node out of band
    pub async fn remove_out_of_band(&self, address: &NodeAddress) -> bool {
        let mut inner = self.inner.lock().await;
        let id = inner
            .resources
            .iter()
            .find(|(_, r)| &r.address == address)
            .map(|(id, _)| id.clone());
        match id {
            Some(id) => {
                inner.resources.remove(&id);
                inner.running.remove(address);
                true
            }
            None => false,
        }
    }

    /// Force a new deployment of a service, as the release pipeline does
    pub async fn roll_out(&self, service: &NodeAddress) -> TopologyResult<DeploymentOutcome> {
        let mut inner = self.inner.lock().await;
        let desired = match inner.live_by_address(service) {
            Some(resource) => desired_count(&resource.attributes),
            None => {
                return Err(TopologyError::ProviderRejection {
                    address: service.clone(),
                    reason: "service does not exist".to_string(),
                })
            }
        };
        Ok(deploy(&mut inner, service, desired))
    }

    pub async fn operations(&self) -> Vec<RecordedOperation> {
        self.inner.lock().await.operations.clone()
    }

    /// Number of create, update, and delete calls received
    pub async fn mutation_count(&self) -> usize {
        self.inner
            .lock()
            .await
            .operations
            .iter()
            .filter(|op| op.operation.is_mutation())
            .count()
    }

    pub async fn reset_operations(&self) {
        self.inner.lock().await.operations.clear();
    }

    pub async fn resource_count(&self) -> usize {
        self.inner.lock().await.resources.len()
    }

    pub async fn exists(&self, address: &NodeAddress) -> bool {
        self.inner.lock().await.live_by_address(address).is_some()
    }

    /// Live attributes of a node by address
    pub async fn live_attributes(&self, address: &NodeAddress) -> Option<AttributeMap> {
        self.inner
            .lock()
            .await
            .live_by_address(address)
            .map(|r| r.attributes.clone())
    }

    /// Healthy tasks a service is running
    pub async fn running_tasks(&self, service: &NodeAddress) -> u32 {
        self.inner
            .lock()
            .await
            .running
            .get(service)
            .copied()
            .unwrap_or(0)
    }

    /// Targets registered with a target group
    pub async fn registered_targets(&self, target_group: &NodeAddress) -> u32 {
        let inner = self.inner.lock().await;
        inner
            .live_by_address(target_group)
            .and_then(|tg| tg.outputs.get("arn"))
            .and_then(Value::as_str)
            .map(|arn| inner.running_for_target_group(arn))
            .unwrap_or(0)
    }

    /// Latest deployment of a service
    pub async fn deployment(&self, service: &NodeAddress) -> Option<Deployment> {
        self.inner
            .lock()
            .await
            .deployments
            .get(service)
            .map(|fsm| fsm.state().clone())
    }

    fn record(inner: &mut Inner, operation: Operation, address: &NodeAddress) -> TopologyResult<()> {
        inner.operations.push(RecordedOperation {
            operation,
            address: address.clone(),
        });
        if let Some(reason) = inner.rejections.get(address) {
            warn!(address = %address, operation = %operation, reason = %reason, "Injected rejection");
            return Err(TopologyError::ProviderRejection {
                address: address.clone(),
                reason: reason.clone(),
            });
        }
        Ok(())
    }

    fn outputs_for(&self, address: &NodeAddress, id: &str, attributes: &AttributeMap) -> AttributeMap {
        let mut outputs = attributes.clone();
        let name = display_name(address, attributes);
        let arn = self.arn_for(address, id, &name);
        let region = &self.region;
        let account = &self.account;

        outputs.insert("id".to_string(), id.into());
        outputs.insert("arn".to_string(), arn.clone().into());
        outputs.insert("name".to_string(), name.clone().into());

        match address.kind {
            ResourceKind::ContainerRepository => {
                outputs.insert(
                    "repository_url".to_string(),
                    format!("{}.dkr.ecr.{}.amazonaws.com/{}", account, region, name).into(),
                );
            }
            ResourceKind::CacheReplicationGroup => {
                outputs.insert(
                    "primary_endpoint_address".to_string(),
                    format!("master.{}.{}.cache.amazonaws.com", name, short_hash(id)).into(),
                );
            }
            ResourceKind::LoadBalancer => {
                outputs.insert(
                    "dns_name".to_string(),
                    format!("{}-{}.elb.{}.amazonaws.com", name, short_hash(id), region).into(),
                );
            }
            ResourceKind::RestApi => {
                outputs.insert("root_resource_id".to_string(), format!("root{}", short_hash(id)).into());
                outputs.insert(
                    "execution_arn".to_string(),
                    format!("arn:aws:execute-api:{}:{}:{}", region, account, id).into(),
                );
            }
            ResourceKind::ApiStage => {
                let api = attributes.get("rest_api_id").and_then(Value::as_str).unwrap_or(id);
                let stage = attributes.get("stage_name").and_then(Value::as_str).unwrap_or(&name);
                outputs.insert(
                    "invoke_url".to_string(),
                    format!("https://{}.execute-api.{}.amazonaws.com/{}", api, region, stage).into(),
                );
                outputs.insert(
                    "arn".to_string(),
                    format!("arn:aws:apigateway:{}::/restapis/{}/stages/{}", region, api, stage).into(),
                );
            }
            ResourceKind::Function => {
                outputs.insert("function_name".to_string(), name.clone().into());
                outputs.insert(
                    "invoke_arn".to_string(),
                    format!(
                        "arn:aws:apigateway:{}:lambda:path/2015-03-31/functions/{}/invocations",
                        region, arn
                    )
                    .into(),
                );
            }
            ResourceKind::Certificate => {
                let domain = attributes.get("domain_name").and_then(Value::as_str).unwrap_or(&name);
                outputs.insert(
                    "validation_record_name".to_string(),
                    format!("_{}.{}.", short_hash(domain), domain).into(),
                );
                outputs.insert("validation_record_type".to_string(), "CNAME".into());
                outputs.insert(
                    "validation_record_value".to_string(),
                    format!("_{}.acm-validations.aws.", short_hash(id)).into(),
                );
            }
            ResourceKind::CertificateValidation => {
                if let Some(cert) = attributes.get("certificate_arn") {
                    outputs.insert("certificate_arn".to_string(), cert.clone());
                }
            }
            ResourceKind::DnsRecord => {
                outputs.insert("fqdn".to_string(), name.clone().into());
            }
            ResourceKind::ApiDomainName => {
                outputs.insert("domain_name".to_string(), name.clone().into());
                outputs.insert(
                    "regional_domain_name".to_string(),
                    format!("d-{}.execute-api.{}.amazonaws.com", short_hash(id), region).into(),
                );
                outputs.insert("regional_zone_id".to_string(), API_REGIONAL_ZONE_ID.into());
            }
            _ => {}
        }

        outputs
    }

    fn arn_for(&self, address: &NodeAddress, id: &str, name: &str) -> String {
        let service = address.kind.service();
        match address.kind {
            ResourceKind::IamRole => format!("arn:aws:iam::{}:role/{}", self.account, name),
            ResourceKind::IamPolicy => format!("arn:aws:iam::{}:policy/{}", self.account, name),
            ResourceKind::ObjectBucket => format!("arn:aws:s3:::{}", name),
            ResourceKind::LogGroup => {
                format!("arn:aws:logs:{}:{}:log-group:{}", self.region, self.account, name)
            }
            ResourceKind::Secret => format!(
                "arn:aws:secretsmanager:{}:{}:secret:{}-{}",
                self.region,
                self.account,
                name,
                &short_hash(id)[..6]
            ),
            _ => format!(
                "arn:aws:{}:{}:{}:{}/{}",
                service,
                self.region,
                self.account,
                address.kind.as_str(),
                id
            ),
        }
    }
}

/// Run one deployment to completion and apply its outcome to running tasks
fn deploy(inner: &mut Inner, service: &NodeAddress, desired: u32) -> DeploymentOutcome {
    let previous = inner.running.get(service).copied().unwrap_or(0);
    let failures = inner.task_failures.remove(service).unwrap_or(0);

    let mut fsm = TrackedMachine::new(Deployment::new(previous, desired));
    let mut events = vec![DeploymentEvent::Start];
    events.extend(std::iter::repeat(DeploymentEvent::TaskFailed).take(failures.min(failure_threshold(desired)) as usize));
    events.extend(std::iter::repeat(DeploymentEvent::TaskHealthy).take(desired as usize));

    let now = chrono::Utc::now();
    let mut outcome = None;
    for event in events {
        match fsm.step_checked(event, now) {
            Ok(Some(done)) => {
                outcome = Some(done);
                break;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(service = %service, error = %e, "Deployment transition refused");
                break;
            }
        }
    }

    let outcome = outcome.unwrap_or(DeploymentOutcome::RolledBack {
        failures,
        serving: previous,
    });
    match outcome {
        DeploymentOutcome::Completed { running } => {
            inner.running.insert(service.clone(), running);
            info!(service = %service, running, "Deployment reached steady state");
        }
        DeploymentOutcome::RolledBack { failures, serving } => {
            inner.running.insert(service.clone(), serving);
            warn!(service = %service, failures, serving, "Deployment rolled back by circuit breaker");
        }
    }
    inner.deployments.insert(service.clone(), fsm);
    outcome
}

fn desired_count(attributes: &AttributeMap) -> u32 {
    attributes
        .get("desired_count")
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}

fn display_name(address: &NodeAddress, attributes: &AttributeMap) -> String {
    ["name", "domain_name", "function_name", "replication_group_id", "bucket", "family"]
        .iter()
        .find_map(|key| attributes.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| match address.index {
            Some(i) => format!("{}-{}", address.name, i),
            None => address.name.clone(),
        })
}

fn short_hash(input: &str) -> String {
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..6].iter().map(|b| format!("{:02x}", b)).collect()
}

fn make_id(address: &NodeAddress, generation: u64) -> String {
    let prefix: String = address
        .kind
        .as_str()
        .split('_')
        .filter_map(|part| part.chars().next())
        .collect();
    format!("{}-{}", prefix, short_hash(&format!("{}#{}", address, generation)))
}

#[async_trait]
impl Provider for SimulatedProvider {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn create(&self, address: &NodeAddress, attributes: &AttributeMap) -> TopologyResult<AttributeMap> {
        let mut inner = self.inner.lock().await;
        Self::record(&mut inner, Operation::Create, address)?;

        if address.kind == ResourceKind::ContainerService {
            let desired = desired_count(attributes);
            if let DeploymentOutcome::RolledBack { failures, .. } = deploy(&mut inner, address, desired) {
                inner.running.remove(address);
                return Err(TopologyError::ProviderRejection {
                    address: address.clone(),
                    reason: format!("initial deployment rolled back after {} failed task launches", failures),
                });
            }
        }

        let generation = {
            let counter = inner.generations.entry(address.clone()).or_insert(0);
            *counter += 1;
            *counter
        };
        let id = make_id(address, generation);
        let outputs = self.outputs_for(address, &id, attributes);
        inner.resources.insert(
            id.clone(),
            LiveResource {
                address: address.clone(),
                attributes: attributes.clone(),
                outputs: outputs.clone(),
            },
        );

        debug!(address = %address, id = %id, "Simulated create");
        Ok(outputs)
    }

    async fn update(
        &self,
        address: &NodeAddress,
        id: &str,
        attributes: &AttributeMap,
    ) -> TopologyResult<AttributeMap> {
        let mut inner = self.inner.lock().await;
        Self::record(&mut inner, Operation::Update, address)?;

        let mut merged = match inner.resources.get(id) {
            Some(resource) => resource.attributes.clone(),
            None => {
                return Err(TopologyError::ProviderRejection {
                    address: address.clone(),
                    reason: format!("no resource with id {}", id),
                })
            }
        };
        merged.extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));

        if address.kind == ResourceKind::ContainerService {
            let desired = desired_count(&merged);
            if let DeploymentOutcome::RolledBack { failures, serving } = deploy(&mut inner, address, desired) {
                return Err(TopologyError::ProviderRejection {
                    address: address.clone(),
                    reason: format!(
                        "deployment rolled back after {} failed task launches; {} previous tasks still serving",
                        failures, serving
                    ),
                });
            }
        }

        let outputs = self.outputs_for(address, id, &merged);
        if let Some(resource) = inner.resources.get_mut(id) {
            resource.attributes = merged;
            resource.outputs = outputs.clone();
        }

        debug!(address = %address, id = %id, "Simulated update");
        Ok(outputs)
    }

    async fn delete(&self, address: &NodeAddress, id: &str) -> TopologyResult<()> {
        let mut inner = self.inner.lock().await;
        Self::record(&mut inner, Operation::Delete, address)?;
        inner.resources.remove(id);
        if inner.live_by_address(address).is_none() {
            inner.running.remove(address);
        }
        debug!(address = %address, id = %id, "Simulated delete");
        Ok(())
    }

    async fn read(&self, address: &NodeAddress, id: &str) -> TopologyResult<Option<AttributeMap>> {
        let mut inner = self.inner.lock().await;
        Self::record(&mut inner, Operation::Read, address)?;
        Ok(inner.resources.get(id).map(|r| r.attributes.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> AttributeMap {
        serde_json::from_value(value).unwrap()
    }

    fn service() -> NodeAddress {
        NodeAddress::new("compute", ResourceKind::ContainerService, "this")
    }

    #[tokio::test]
    async fn test_ids_are_deterministic() {
        let address = NodeAddress::new("network", ResourceKind::Vpc, "this");
        let first = SimulatedProvider::default();
        let second = SimulatedProvider::default();

        let a = first.create(&address, &attrs(json!({"cidr_block": "10.0.0.0/16"}))).await.unwrap();
        let b = second.create(&address, &attrs(json!({"cidr_block": "10.0.0.0/16"}))).await.unwrap();
        assert_eq!(a.get("id"), b.get("id"));
        assert!(a["id"].as_str().unwrap().starts_with("v-"));
    }

    #[tokio::test]
    async fn test_repository_url_output() {
        let provider = SimulatedProvider::default();
        let address = NodeAddress::new("registry", ResourceKind::ContainerRepository, "this");
        let outputs = provider.create(&address, &attrs(json!({"name": "webhook-dev"}))).await.unwrap();
        assert_eq!(
            outputs["repository_url"],
            json!("123456789012.dkr.ecr.ap-northeast-1.amazonaws.com/webhook-dev")
        );
    }

    #[tokio::test]
    async fn test_rejection_is_recorded() {
        let provider = SimulatedProvider::default();
        let address = NodeAddress::new("cache", ResourceKind::CacheReplicationGroup, "this");
        provider.reject(&address, "quota exceeded").await;

        let err = provider.create(&address, &AttributeMap::new()).await.unwrap_err();
        assert!(matches!(err, TopologyError::ProviderRejection { ref reason, .. } if reason == "quota exceeded"));
        assert_eq!(provider.mutation_count().await, 1);
        assert_eq!(provider.resource_count().await, 0);
    }

    #[tokio::test]
    async fn test_service_runs_desired_tasks_and_registers_targets() {
        let provider = SimulatedProvider::default();
        let tg = NodeAddress::new("compute", ResourceKind::TargetGroup, "app");
        let tg_out = provider.create(&tg, &attrs(json!({"name": "webhook-dev-tg"}))).await.unwrap();

        provider
            .create(
                &service(),
                &attrs(json!({
                    "desired_count": 1,
                    "load_balancer": {"target_group_arn": tg_out["arn"]}
                })),
            )
            .await
            .unwrap();

        assert_eq!(provider.running_tasks(&service()).await, 1);
        assert_eq!(provider.registered_targets(&tg).await, 1);
    }

    #[tokio::test]
    async fn test_failed_rollout_keeps_previous_tasks() {
        let provider = SimulatedProvider::default();
        let outputs = provider
            .create(&service(), &attrs(json!({"desired_count": 2})))
            .await
            .unwrap();
        let id = outputs["id"].as_str().unwrap().to_string();

        provider.fail_task_launches(&service(), 10).await;
        let result = provider
            .update(&service(), &id, &attrs(json!({"desired_count": 3})))
            .await;

        assert!(result.is_err());
        assert_eq!(provider.running_tasks(&service()).await, 2);
        let live = provider.live_attributes(&service()).await.unwrap();
        assert_eq!(live["desired_count"], json!(2));
    }

    #[tokio::test]
    async fn test_drift_changes_live_attributes() {
        let provider = SimulatedProvider::default();
        let address = NodeAddress::new("compute", ResourceKind::LogGroup, "app");
        let outputs = provider
            .create(&address, &attrs(json!({"name": "/ecs/webhook-dev", "retention_in_days": 7})))
            .await
            .unwrap();

        assert!(provider.drift(&address, "retention_in_days", json!(1)).await);
        let live = provider
            .read(&address, outputs["id"].as_str().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(live["retention_in_days"], json!(1));
    }
}
