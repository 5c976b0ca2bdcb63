//! Remediation engine CLI.
//!
//! `remedy serve` runs the HTTP service; `remedy validate` lints the config
//! file; `remedy actions` queries a running server's action history.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use remedy::config::{EngineConfig, FileConfig};
use remedy::executor::{
    CloudRunExecutor, ExecutorSet, KubernetesExecutor, TargetExecutor, UnavailableExecutor,
};
use remedy::ledger::{ActionLedger, MemoryLedger};
use remedy::policy::PolicyEngine;
use remedy::registry::TargetRegistry;
use remedy::server::{run_server, AppState};
use remedy::types::{ActionRecord, ActionStatus, Platform};
use remedy::{reconcile, TriggeredBy};

/// Anomaly-driven auto-remediation engine for Kubernetes and Cloud Run
#[derive(Parser)]
#[command(name = "remedy")]
#[command(about = "Anomaly-driven auto-remediation engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the remediation HTTP service
    Serve {
        /// Address to listen on (overrides LISTEN_ADDR)
        #[arg(long)]
        listen: Option<String>,

        /// Path to the JSON config file (overrides REMEDY_CONFIG)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Record actions without invoking backends
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate the config file and print the resolved targets and policy
    Validate {
        /// Path to the JSON config file
        #[arg(long, default_value = "remedy-config.json")]
        config: PathBuf,
    },
    /// Query action history from a running server
    Actions {
        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:8003")]
        server: String,

        /// Filter by service name
        #[arg(long)]
        service: Option<String>,

        /// Filter by status (pending, running, succeeded, failed)
        #[arg(long)]
        status: Option<String>,

        /// Maximum records to fetch
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "remedy=debug,notify=debug,tower_http=debug"
    } else {
        "remedy=info,notify=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    match cli.command {
        Commands::Serve {
            listen,
            config,
            dry_run,
        } => serve(listen, config, dry_run).await,
        Commands::Validate { config } => validate(&config),
        Commands::Actions {
            server,
            service,
            status,
            limit,
        } => actions(&server, service, status, limit).await,
    }
}

/// Run the HTTP service.
async fn serve(listen: Option<String>, config_path: Option<PathBuf>, dry_run: bool) -> Result<()> {
    let mut config = EngineConfig::from_env();
    if let Some(listen) = listen {
        config.listen_addr = listen;
    }
    if let Some(path) = config_path {
        config.config_path = path;
    }
    config.dry_run = config.dry_run || dry_run;
    let config = Arc::new(config);

    let file = FileConfig::load(&config.config_path)?;
    info!(
        targets = file.targets.len(),
        rules = file.policy.rules.len(),
        config = %config.config_path.display(),
        "Configuration loaded"
    );

    let registry = Arc::new(TargetRegistry::from_file(
        config.config_path.clone(),
        &file,
    ));
    let policy = PolicyEngine::new(file.policy);
    let notifier = Arc::new(notify::Notifier::from_env());
    let ledger: Arc<dyn ActionLedger> = Arc::new(MemoryLedger::new());

    let kubernetes: Arc<dyn TargetExecutor> =
        match KubernetesExecutor::try_default(config.default_namespace.clone()).await {
            Ok(executor) => Arc::new(executor),
            Err(e) => {
                warn!(error = %e, "Kubernetes executor unavailable");
                Arc::new(UnavailableExecutor::new("kubernetes", e.to_string()))
            }
        };
    let cloud_run: Arc<dyn TargetExecutor> = match &config.gcp_project_id {
        Some(project_id) => Arc::new(CloudRunExecutor::new(project_id.clone())),
        None => {
            warn!("Cloud Run executor unavailable (GCP_PROJECT_ID not set)");
            Arc::new(UnavailableExecutor::new(
                "cloud_run",
                "GCP_PROJECT_ID not set",
            ))
        }
    };
    let executors = ExecutorSet::new(kubernetes, cloud_run);

    // Recover locks held by records stranded by a previous crash, then keep
    // sweeping in the background.
    let grace = Duration::from_secs(config.stale_grace_secs);
    let swept = reconcile::sweep_once(&ledger, &notifier, grace).await;
    if swept > 0 {
        info!(swept, "Startup reconciliation force-failed stale records");
    }
    tokio::spawn(reconcile::run_sweeper(
        ledger.clone(),
        notifier.clone(),
        grace,
    ));

    if config.dry_run {
        warn!("Dry-run mode: backend calls are skipped");
    }

    let listen_addr = config.listen_addr.clone();
    let state = Arc::new(AppState::new(
        config, registry, policy, ledger, executors, notifier,
    ));

    run_server(state, &listen_addr).await
}

/// Validate the config file and print a summary.
fn validate(config_path: &PathBuf) -> Result<()> {
    let file = FileConfig::load(config_path)?;

    println!("{}", "Config OK".green().bold());
    println!();
    println!("{} ({})", "Targets".bold(), file.targets.len());
    for target in &file.targets {
        let location = match target.platform {
            Platform::Kubernetes => format!(
                "cluster {} / namespace {}",
                target.cluster_or_region,
                target.namespace.as_deref().unwrap_or("default")
            ),
            Platform::CloudRun => format!("region {}", target.cluster_or_region),
        };
        println!(
            "  {} [{}] {}",
            target.service_name.cyan(),
            target.platform,
            location.dimmed()
        );
    }

    println!();
    println!("{} ({} rules)", "Policy".bold(), file.policy.rules.len());
    println!("  min_score: {}", file.policy.min_score);
    println!(
        "  require_approval_for_critical: {}",
        file.policy.require_approval_for_critical
    );
    for (severity, rule) in &file.policy.rules {
        println!("  {} -> {}", severity.as_str().yellow(), rule.action);
    }

    Ok(())
}

/// Fetch and print action history from a running server.
async fn actions(
    server: &str,
    service: Option<String>,
    status: Option<String>,
    limit: usize,
) -> Result<()> {
    let mut url = format!("{server}/api/v1/actions?limit={limit}");
    if let Some(service) = service {
        url.push_str(&format!("&service={service}"));
    }
    if let Some(status) = status {
        url.push_str(&format!("&status={status}"));
    }

    let records: Vec<ActionRecord> = reqwest::get(&url)
        .await
        .context("Failed to query server")?
        .error_for_status()
        .context("Server returned an error")?
        .json()
        .await
        .context("Failed to parse action records")?;

    if records.is_empty() {
        println!("{}", "No actions recorded".dimmed());
        return Ok(());
    }

    for record in records {
        let status = match record.status {
            ActionStatus::Succeeded => record.status.as_str().green(),
            ActionStatus::Failed => record.status.as_str().red(),
            ActionStatus::Running | ActionStatus::Pending => record.status.as_str().yellow(),
        };
        let trigger = match record.request.triggered_by {
            TriggeredBy::Auto => "auto".blue(),
            TriggeredBy::Manual => "manual".magenta(),
        };
        println!(
            "{} {:>9} {:<16} {:<16} [{}] attempts={} {}",
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            status,
            record.request.service_name,
            record.request.action_type.as_str(),
            trigger,
            record.attempt_count,
            record.result_message.as_deref().unwrap_or("").dimmed()
        );
    }

    Ok(())
}
