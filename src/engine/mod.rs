// Copyright (c) 2025 - Cowboy AI, Inc.
//! Convergent Evaluator
//!
//! Reconciles a declared graph with the environment's state record through a
//! [`Provider`]. Every run that reads or writes state holds the
//! environment's exclusive lock for its whole duration:
//!
//! ```text
//! lock ──> load ──> refresh ──> plan ──> apply wave ──> deletes ──> persist ──> unlock
//!   │
//!   └─ LockContention: fail fast, no provider call made
//! ```
//!
//! Nothing is retried. A rejected call fails its node, already-applied
//! siblings stay recorded, and dependents are skipped; re-running the same
//! graph converges the rest.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use webhook_topology::{compose, EnvironmentParameters, Evaluator, SimulatedProvider};
//! use webhook_topology::state::MemoryStateBackend;
//!
//! # async fn run(params: EnvironmentParameters) -> webhook_topology::TopologyResult<()> {
//! let composition = compose(&params)?;
//! let evaluator = Evaluator::new(
//!     Arc::new(MemoryStateBackend::new()),
//!     Arc::new(SimulatedProvider::default()),
//! );
//! let report = evaluator.apply(&composition).await?;
//! println!("{}", report);
//! # Ok(())
//! # }
//! ```

mod execute;
mod report;

pub use report::{AppliedAction, ApplyReport, FailedAction};

use futures::future::try_join_all;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::composition::{Composition, CompositionOutputs};
use crate::domain::EnvironmentName;
use crate::errors::{TopologyError, TopologyResult};
use crate::graph::{NodeAddress, OutputRef, ResolveMode, ResourceGraph};
use crate::plan::{self, LiveView, Plan};
use crate::provider::Provider;
use crate::state::{LockInfo, ResourceStatus, StateBackend, StateRecord};
use execute::Run;

/// Reconciles declared graphs with recorded state
pub struct Evaluator {
    backend: Arc<dyn StateBackend>,
    provider: Arc<dyn Provider>,
    holder: String,
    refresh: bool,
}

impl Evaluator {
    pub fn new(backend: Arc<dyn StateBackend>, provider: Arc<dyn Provider>) -> Self {
        let holder = std::env::var("USER")
            .map(|user| format!("{}@topology/{}", user, std::process::id()))
            .unwrap_or_else(|_| format!("topology/{}", std::process::id()));
        Self {
            backend,
            provider,
            holder,
            refresh: true,
        }
    }

    /// Name recorded in the lock entry
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    /// Plan from the record alone, without reading live infrastructure
    pub fn without_refresh(mut self) -> Self {
        self.refresh = false;
        self
    }

    pub fn backend(&self) -> &Arc<dyn StateBackend> {
        &self.backend
    }

    /// Compute the delta without changing anything
    pub async fn plan(&self, composition: &Composition) -> TopologyResult<Plan> {
        self.locked(&composition.environment, "plan", || async move {
            let record = self.load(&composition.environment).await?;
            let live = self.refresh(&record).await?;
            plan::build(&composition.graph, &record, &live)
        })
        .await
    }

    /// Converge the environment onto the declared graph
    pub async fn apply(&self, composition: &Composition) -> TopologyResult<ApplyReport> {
        self.locked(&composition.environment, "apply", || self.run_apply(composition))
            .await
    }

    /// Delete every recorded node of an environment
    pub async fn destroy(&self, environment: &EnvironmentName) -> TopologyResult<ApplyReport> {
        self.locked(environment, "destroy", || async move {
            let record = self.load(environment).await?;
            if record.is_empty() {
                info!(environment = %environment, "Nothing recorded to destroy");
                return Ok(ApplyReport::new(environment.clone(), record.serial));
            }

            let everything: BTreeSet<NodeAddress> = record.resources.keys().cloned().collect();
            let plan = Plan::destroy(environment.clone(), record.serial, record.deletion_order(&everything));
            let graph = ResourceGraph::new();
            let mut run = Run::new(&graph, self.provider.clone(), record);
            run.execute(&plan).await;
            run.record.outputs.clear();

            let (record, mut report) = run.finish();
            self.backend.persist(&record).await?;
            report.persisted = true;
            info!(environment = %environment, serial = record.serial, remaining = record.len(), "Destroy finished");
            Ok(report)
        })
        .await
    }

    /// Root outputs recorded by the last run
    pub async fn outputs(&self, environment: &EnvironmentName) -> TopologyResult<BTreeMap<String, Value>> {
        Ok(self.load(environment).await?.outputs)
    }

    /// Mark a recorded node for replacement on the next apply
    pub async fn taint(&self, environment: &EnvironmentName, address: &NodeAddress) -> TopologyResult<()> {
        self.locked(environment, "taint", || async move {
            let mut record = self.load(environment).await?;
            let resource = record
                .resources
                .get_mut(address)
                .ok_or_else(|| TopologyError::State(format!("{} is not recorded", address)))?;
            resource.status = ResourceStatus::Tainted;
            record.serial += 1;
            record.updated_at = chrono::Utc::now();
            self.backend.persist(&record).await?;
            warn!(environment = %environment, address = %address, "Marked node as tainted");
            Ok(())
        })
        .await
    }

    async fn run_apply(&self, composition: &Composition) -> TopologyResult<ApplyReport> {
        let environment = &composition.environment;
        let record = self.load(environment).await?;
        let live = self.refresh(&record).await?;
        let plan = plan::build(&composition.graph, &record, &live)?;
        let summary = plan.summary();
        info!(
            environment = %environment,
            serial = record.serial,
            create = summary.create,
            update = summary.update,
            replace = summary.replace,
            delete = summary.delete,
            "Applying plan"
        );

        let previous_outputs = record.outputs.clone();
        let mut run = Run::new(&composition.graph, self.provider.clone(), record);
        run.execute(&plan).await;
        run.record.outputs = resolve_outputs(&composition.graph, &composition.outputs, &run.record);

        if !plan.has_changes() && run.record.outputs == previous_outputs {
            info!(environment = %environment, "Environment already converged");
            let mut report = run.report;
            report.outputs = run.record.outputs;
            return Ok(report);
        }

        let (record, mut report) = run.finish();
        self.backend.persist(&record).await?;
        report.persisted = true;
        report.outputs = record.outputs.clone();

        if report.is_success() {
            info!(environment = %environment, serial = record.serial, "{}", report);
        } else {
            warn!(environment = %environment, serial = record.serial, "{}", report);
        }
        Ok(report)
    }

    async fn load(&self, environment: &EnvironmentName) -> TopologyResult<StateRecord> {
        Ok(self
            .backend
            .load(environment)
            .await?
            .unwrap_or_else(|| StateRecord::new(environment.clone())))
    }

    /// Read every recorded node from the provider
    async fn refresh(&self, record: &StateRecord) -> TopologyResult<LiveView> {
        if !self.refresh {
            return Ok(LiveView::new());
        }

        let reads = record.resources.iter().filter_map(|(address, resource)| {
            let id = resource.id()?.to_string();
            let provider = self.provider.clone();
            let address = address.clone();
            Some(async move {
                let live = provider.read(&address, &id).await?;
                Ok::<_, TopologyError>((address, live))
            })
        });
        Ok(try_join_all(reads).await?.into_iter().collect())
    }

    /// Hold the environment lock around `body`, releasing it on every path
    async fn locked<T, F, Fut>(&self, environment: &EnvironmentName, operation: &str, body: F) -> TopologyResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TopologyResult<T>>,
    {
        let lock = LockInfo::new(environment.clone(), self.holder.clone(), operation);
        if let Err(e) = self.backend.lock(&lock).await {
            warn!(environment = %environment, operation, error = %e, "Could not acquire state lock");
            return Err(e);
        }

        let result = body().await;

        match self.backend.unlock(&lock).await {
            Ok(()) => result,
            Err(e) => {
                warn!(environment = %environment, lock_id = %lock.id, error = %e, "Failed to release state lock");
                result.and(Err(e))
            }
        }
    }
}

/// Resolve root outputs whose owning module is fully created
///
/// Outputs built from sensitive values are never resolved.
pub fn resolve_outputs(
    graph: &ResourceGraph,
    outputs: &CompositionOutputs,
    record: &StateRecord,
) -> BTreeMap<String, Value> {
    let lookup = |r: &OutputRef| record.lookup(r);
    outputs
        .values
        .iter()
        .filter(|(_, output)| !output.value.contains_sensitive())
        .filter(|(_, output)| module_complete(graph, &output.module, record))
        .filter_map(|(name, output)| {
            output
                .value
                .resolve(&lookup, ResolveMode::Redacted)
                .ok()
                .map(|value| (name.clone(), value))
        })
        .collect()
}

fn module_complete(graph: &ResourceGraph, module: &str, record: &StateRecord) -> bool {
    graph
        .module_record(module)
        .map(|m| {
            m.nodes.iter().all(|address| {
                record
                    .resource(address)
                    .map(|r| !r.is_tainted())
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}
