// Copyright (c) 2025 - Cowboy AI, Inc.
//! Topology Command Surface
//!
//! Per-environment wrapper around composition, planning, and evaluation.
//!
//! Run with: cargo run --bin topology -- --environment dev --var-file environments/dev.json plan
//!
//! State backend selection comes from `TOPOLOGY_STATE_BACKEND` (see
//! `webhook_topology::config`). Provider calls go to the simulated control
//! plane, seeded from the recorded state of the environment.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use webhook_topology::composition::{compose, compose_bootstrap, feature_summary, Composition, EnvironmentParameters};
use webhook_topology::config::BackendConfig;
use webhook_topology::domain::EnvironmentName;
use webhook_topology::pipeline::ImagePipeline;
use webhook_topology::state::StateBackend;
use webhook_topology::{ApplyReport, Evaluator, NodeAddress, SimulatedProvider};

#[derive(Parser)]
#[command(
    name = "topology",
    about = "Compose, plan, and apply the webhook service topology",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Environment name; must match the variable file
    #[arg(short, long, global = true, default_value = "dev")]
    environment: String,

    /// Parameter file for the environment
    #[arg(long, global = true)]
    var_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the state backend bootstrap graph
    Init,
    /// Show the planned delta
    Plan {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Converge the environment
    Apply,
    /// Delete everything recorded for the environment
    Destroy,
    /// Rewrite the variable file canonically
    Fmt {
        /// Only report whether the file is canonical
        #[arg(long, default_value_t = false)]
        check: bool,
    },
    /// Parse, check contracts, and validate the graph
    Validate,
    /// Print recorded outputs
    Output {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print the image build-and-push steps for a tag
    ImagePlan {
        #[arg(long)]
        tag: String,
    },
    /// Force replacement of a node on the next apply
    Taint { address: String },
}

impl Cli {
    fn var_file(&self) -> PathBuf {
        self.var_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("environments/{}.json", self.environment)))
    }

    async fn params(&self) -> Result<EnvironmentParameters> {
        let path = self.var_file();
        let params = EnvironmentParameters::load(&path)
            .await
            .with_context(|| format!("Failed to load {}", path.display()))?;
        if params.environment.as_str() != self.environment {
            bail!(
                "{} declares environment '{}', not '{}'",
                path.display(),
                params.environment,
                self.environment
            );
        }
        Ok(params)
    }
}

/// Evaluator over the configured backend and a provider seeded from state
async fn evaluator(backend: Arc<dyn StateBackend>, environment: &EnvironmentName, region: &str) -> Result<Evaluator> {
    let provider = match backend.load(environment).await.context("Failed to load state")? {
        Some(record) => SimulatedProvider::from_state(region, &record),
        None => SimulatedProvider::new(region),
    };
    Ok(Evaluator::new(backend, Arc::new(provider)))
}

fn finish(report: ApplyReport) -> Result<()> {
    println!("{}", report);
    for failure in &report.failed {
        println!("  failed  {}: {}", failure.address, failure.error);
    }
    for skipped in &report.skipped {
        println!("  skipped {}", skipped);
    }
    if !report.is_success() {
        bail!("{} action(s) failed; re-run after resolving them", report.failed.len());
    }
    Ok(())
}

async fn apply(backend: Arc<dyn StateBackend>, composition: &Composition, region: &str) -> Result<ApplyReport> {
    let evaluator = evaluator(backend, &composition.environment, region).await?;
    evaluator
        .apply(composition)
        .await
        .with_context(|| format!("Apply failed for environment '{}'", composition.environment))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Fmt { check } => {
            let path = cli.var_file();
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let canonical = EnvironmentParameters::from_json(&raw)?.to_canonical_json()?;
            if raw == canonical {
                info!(file = %path.display(), "Already canonical");
            } else if *check {
                bail!("{} is not canonically formatted", path.display());
            } else {
                tokio::fs::write(&path, canonical)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!(file = %path.display(), "Rewrote variable file");
            }
        }

        Commands::Validate => {
            let params = cli.params().await?;
            let composition = compose(&params).context("Validation failed")?;
            println!(
                "Environment '{}' is valid: {} nodes across {} modules",
                composition.environment,
                composition.graph.len(),
                composition.graph.modules().count()
            );
            for (feature, enabled) in feature_summary(&params) {
                println!("  {:<14} {}", feature, if enabled { "enabled" } else { "disabled" });
            }
        }

        Commands::Init => {
            let params = cli.params().await?;
            let backend = BackendConfig::from_env()?.open().await?;
            let bootstrap = compose_bootstrap(&params)?;
            let report = apply(backend, &bootstrap, &params.region).await?;
            for (name, value) in &report.outputs {
                println!("{} = {}", name, value);
            }
            finish(report)?;
        }

        Commands::Plan { json } => {
            let params = cli.params().await?;
            let composition = compose(&params)?;
            let backend = BackendConfig::from_env()?.open().await?;
            let plan = evaluator(backend, &composition.environment, &params.region)
                .await?
                .plan(&composition)
                .await
                .context("Plan failed")?;
            if *json {
                println!("{}", plan.to_json()?);
            } else {
                print!("{}", plan.render_text());
            }
        }

        Commands::Apply => {
            let params = cli.params().await?;
            let composition = compose(&params)?;
            let backend = BackendConfig::from_env()?.open().await?;
            finish(apply(backend, &composition, &params.region).await?)?;
        }

        Commands::Destroy => {
            let params = cli.params().await?;
            let backend = BackendConfig::from_env()?.open().await?;
            warn!(environment = %params.environment, "Destroying every recorded node");
            let report = evaluator(backend, &params.environment, &params.region)
                .await?
                .destroy(&params.environment)
                .await
                .context("Destroy failed")?;
            finish(report)?;
        }

        Commands::Output { json } => {
            let environment = EnvironmentName::new(cli.environment.as_str())?;
            let backend = BackendConfig::from_env()?.open().await?;
            let outputs = recorded_outputs(backend, &environment).await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&outputs)?);
            } else {
                for (name, value) in &outputs {
                    println!("{} = {}", name, value);
                }
            }
        }

        Commands::ImagePlan { tag } => {
            let params = cli.params().await?;
            let backend = BackendConfig::from_env()?.open().await?;
            let outputs = recorded_outputs(backend, &params.environment).await?;
            let repository_url = outputs
                .get("repository_url")
                .and_then(|v| v.as_str())
                .context("No repository_url recorded; apply the environment first")?;
            let pipeline = ImagePipeline::plan(repository_url, tag, &params.region)?;
            for step in &pipeline.steps {
                println!("{}", step);
            }
        }

        Commands::Taint { address } => {
            let params = cli.params().await?;
            let address: NodeAddress = address.parse()?;
            let backend = BackendConfig::from_env()?.open().await?;
            evaluator(backend, &params.environment, &params.region)
                .await?
                .taint(&params.environment, &address)
                .await
                .with_context(|| format!("Failed to taint {}", address))?;
            println!("{} will be replaced on the next apply", address);
        }
    }

    Ok(())
}

async fn recorded_outputs(
    backend: Arc<dyn StateBackend>,
    environment: &EnvironmentName,
) -> Result<std::collections::BTreeMap<String, serde_json::Value>> {
    Ok(backend
        .load(environment)
        .await
        .context("Failed to load state")?
        .map(|record| record.outputs)
        .unwrap_or_default())
}
