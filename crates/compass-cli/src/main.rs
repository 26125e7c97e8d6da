//! Compass CLI - metric evaluation for progressive delivery
//!
//! Usage:
//!   compass init                         Write a default compass.toml
//!   compass datasource add <name> ...    Register a telemetry backend
//!   compass group create <file>          Create a metrics group from JSON
//!   compass evaluate <group-id>          Evaluate one metrics group
//!   compass executions                   Show every metric execution
//!   compass run                          Evaluate all groups periodically

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use compass_core::{config::CONFIG_FILE, CompassConfig, Health, NewDataSource};
use compass_drivers::DriverRegistry;
use compass_engine::Engine;
use compass_storage::{CredentialCipher, TursoStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "compass")]
#[command(author, version, about = "Metric evaluation for progressive delivery")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Data source management
    Datasource {
        #[command(subcommand)]
        action: DataSourceCommands,
    },

    /// Metrics group management
    Group {
        #[command(subcommand)]
        action: GroupCommands,
    },

    /// Evaluate one metrics group and print the results as JSON
    Evaluate {
        /// Metrics group ID
        group: Uuid,

        /// Overall deadline in milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
    },

    /// Show every metric execution
    Executions,

    /// Evaluate every group on the configured interval until Ctrl-C
    Run,
}

#[derive(Subcommand)]
enum DataSourceCommands {
    /// Register a data source
    Add {
        /// Display name
        name: String,

        /// Workspace ID
        #[arg(long)]
        workspace: Uuid,

        /// Driver type
        #[arg(long, default_value = "prometheus")]
        driver: String,

        /// Connection configuration as JSON
        #[arg(long)]
        data: String,
    },

    /// List the data sources of a workspace
    List {
        /// Workspace ID
        workspace: Uuid,

        /// Only sources with this health
        #[arg(long, value_enum)]
        health: Option<CliHealth>,
    },

    /// Soft-delete a data source
    Delete {
        /// Data source ID
        id: Uuid,
    },
}

/// CLI-friendly health enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliHealth {
    Healthy,
    Unhealthy,
    Unknown,
}

impl From<CliHealth> for Health {
    fn from(h: CliHealth) -> Self {
        match h {
            CliHealth::Healthy => Health::Healthy,
            CliHealth::Unhealthy => Health::Unhealthy,
            CliHealth::Unknown => Health::Unknown,
        }
    }
}

#[derive(Subcommand)]
enum GroupCommands {
    /// Create a metrics group from a JSON document
    Create {
        /// Path to the document
        file: PathBuf,
    },

    /// List all metrics groups
    List,

    /// Show one metrics group with its metrics
    Show {
        /// Metrics group ID
        id: Uuid,
    },

    /// Delete a metrics group and its metrics
    Delete {
        /// Metrics group ID
        id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { force } => cmd_init(&cli.config, force).await,
        Commands::Datasource { action } => cmd_datasource(&cli.config, action).await,
        Commands::Group { action } => cmd_group(&cli.config, action).await,
        Commands::Evaluate { group, deadline_ms } => {
            cmd_evaluate(&cli.config, group, deadline_ms).await
        }
        Commands::Executions => cmd_executions(&cli.config).await,
        Commands::Run => cmd_run(&cli.config).await,
    }
}

/// Open the store and wire every service from the configuration
async fn open_engine(config_path: &Path) -> Result<Engine> {
    let config = CompassConfig::load_or_default(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let passphrase = config.encryption_key()?;
    let cipher = CredentialCipher::from_passphrase(&passphrase)?;

    let store = TursoStore::open(&config.database.path)
        .await
        .with_context(|| format!("Failed to open {}", config.database.path.display()))?;

    let registry = DriverRegistry::with_builtin(&config.drivers);
    info!("Drivers available: {}", registry.kinds().join(", "));

    Ok(Engine::new(
        Arc::new(store),
        cipher,
        Arc::new(registry),
        config.evaluation,
    ))
}

async fn cmd_init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    CompassConfig::write_default(config_path)?;
    println!("Wrote default configuration to {}", config_path.display());
    println!("Set ENCRYPTION_KEY before registering data sources.");
    Ok(())
}

async fn cmd_datasource(config_path: &Path, action: DataSourceCommands) -> Result<()> {
    let engine = open_engine(config_path).await?;

    match action {
        DataSourceCommands::Add {
            name,
            workspace,
            driver,
            data,
        } => {
            let data: serde_json::Value =
                serde_json::from_str(&data).context("Connection data is not valid JSON")?;
            let source = engine
                .data_sources
                .create(NewDataSource {
                    name,
                    workspace_id: workspace,
                    plugin_src: driver,
                    data,
                })
                .await?;
            println!("Created data source {}", source.id);
        }
        DataSourceCommands::List { workspace, health } => {
            let sources = match health {
                Some(health) => {
                    engine
                        .data_sources
                        .list_by_workspace_and_health(workspace, health.into())
                        .await?
                }
                None => engine.data_sources.list_by_workspace(workspace).await?,
            };

            println!("Data sources: {}", sources.len());
            for source in &sources {
                println!(
                    "  {} {} ({}, {})",
                    source.id, source.name, source.plugin_src, source.health
                );
            }
        }
        DataSourceCommands::Delete { id } => {
            engine.data_sources.delete(id).await?;
            println!("Deleted data source {}", id);
        }
    }

    Ok(())
}

async fn cmd_group(config_path: &Path, action: GroupCommands) -> Result<()> {
    let engine = open_engine(config_path).await?;

    match action {
        GroupCommands::Create { file } => {
            let document = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let group = engine.groups.parse(&document)?;
            let group = engine.groups.create(group).await?;
            println!(
                "Created metrics group {} with {} metrics",
                group.id,
                group.metrics.len()
            );
        }
        GroupCommands::List => {
            let groups = engine.groups.find_all().await?;
            println!("Metrics groups: {}", groups.len());
            for group in &groups {
                println!(
                    "  {} {} (circle {}, {} metrics)",
                    group.id,
                    group.name,
                    group.circle_id,
                    group.metrics.len()
                );
            }
        }
        GroupCommands::Show { id } => {
            let group = engine.groups.find_by_id(id).await?;
            println!("{}", serde_json::to_string_pretty(&group)?);
        }
        GroupCommands::Delete { id } => {
            engine.groups.delete(id).await?;
            println!("Deleted metrics group {}", id);
        }
    }

    Ok(())
}

async fn cmd_evaluate(config_path: &Path, group_id: Uuid, deadline_ms: Option<u64>) -> Result<()> {
    let engine = open_engine(config_path).await?;

    let deadline = deadline_ms
        .map(std::time::Duration::from_millis)
        .or_else(|| engine.orchestrator.config().group_deadline());

    let cancel = CancellationToken::new();
    let evaluation = tokio::select! {
        result = engine.orchestrator.evaluate_with(group_id, cancel.clone(), deadline) => {
            result.context("Evaluation failed")?
        }
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            anyhow::bail!("Evaluation interrupted");
        }
    };

    let output = serde_json::json!({
        "groupId": evaluation.group_id,
        "results": evaluation.results,
        "failures": evaluation.failures,
        "executions": evaluation.executions,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn cmd_executions(config_path: &Path) -> Result<()> {
    let engine = open_engine(config_path).await?;
    let executions = engine.tracker.find_all().await?;

    println!("Metric executions: {}", executions.len());
    for execution in &executions {
        println!(
            "  {} {} last value {}",
            execution.metric_id, execution.status, execution.last_value
        );
    }
    Ok(())
}

async fn cmd_run(config_path: &Path) -> Result<()> {
    let engine = open_engine(config_path).await?;
    let scheduler = engine.scheduler();

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
                cancel.cancel();
            }
        })
    };

    scheduler.run(cancel).await;
    ctrl_c.abort();
    Ok(())
}
