//! # Runbook Validator
//!
//! Command-line tool for checking runbooks and configuration before they are
//! scheduled, and for inspecting persisted runs.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use runbook_orchestrator::config::ConfigManager;
use runbook_orchestrator::models::{shared_dependencies, RunbookDefinition, RunbookTemplate};
use runbook_orchestrator::state_machine::{FileRunStore, RunStore};
use runbook_orchestrator::utils::variables::referenced_variables;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "runbook-validator")]
#[command(about = "Validate runbooks and inspect orchestrator state")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate a runbook file (YAML or JSON)
    Validate {
        file: PathBuf,
    },

    /// Print the execution layers of a runbook
    Plan {
        file: PathBuf,
    },

    /// Load orchestrator configuration for an environment and print it
    Config {
        /// Configuration directory path
        #[arg(short, long, default_value = "config")]
        config_dir: PathBuf,

        /// Environment overlay to apply (defaults to RUNBOOK_ENV)
        #[arg(short, long)]
        environment: Option<String>,
    },

    /// Print the summary of a persisted run
    ShowRun {
        run_id: Uuid,

        /// Directory holding run snapshots
        #[arg(long, default_value = "state/runs")]
        state_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Commands::Validate { file } => validate(file),
        Commands::Plan { file } => plan(file),
        Commands::Config {
            config_dir,
            environment,
        } => show_config(config_dir, environment.as_deref()),
        Commands::ShowRun { run_id, state_dir } => show_run(*run_id, state_dir).await,
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("{e:#}");
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load_definition(file: &Path) -> anyhow::Result<RunbookDefinition> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;

    let template = match file.extension().and_then(|ext| ext.to_str()) {
        Some("json") => RunbookTemplate::from_json_str(&source)?,
        Some("yaml") | Some("yml") => RunbookTemplate::from_yaml_str(&source)?,
        other => bail!("unsupported runbook format: {}", other.unwrap_or("<none>")),
    };

    Ok(RunbookDefinition::load(template)?)
}

fn validate(file: &Path) -> anyhow::Result<()> {
    let definition = load_definition(file)?;

    println!("✅ Runbook '{}' v{} is valid", definition.id, definition.version);
    println!("   Name: {}", definition.name);
    if let Some(owner) = &definition.owner {
        println!("   Owner: {owner}");
    }
    println!("   Steps: {}", definition.len());

    let variables = definition
        .steps()
        .iter()
        .flat_map(|step| referenced_variables(&step.action))
        .collect::<BTreeSet<_>>();
    if variables.is_empty() {
        println!("   Variables: none");
    } else {
        let names = variables.into_iter().collect::<Vec<_>>();
        println!("   Variables: {}", names.join(", "));
    }
    Ok(())
}

fn plan(file: &Path) -> anyhow::Result<()> {
    let definition = load_definition(file)?;
    let shared = shared_dependencies(&definition);

    println!("📋 Execution plan for '{}'", definition.id);
    for (index, layer) in definition.execution_layers().iter().enumerate() {
        println!("\nLayer {}:", index + 1);
        for step in layer {
            let mut markers = Vec::new();
            if step.optional {
                markers.push("optional");
            }
            if shared.contains(step.id.as_str()) {
                markers.push("shared");
            }
            let suffix = if markers.is_empty() {
                String::new()
            } else {
                format!(" [{}]", markers.join(", "))
            };
            println!("  - {} ({}){}", step.id, step.kind, suffix);
        }
    }
    Ok(())
}

fn show_config(config_dir: &Path, environment: Option<&str>) -> anyhow::Result<()> {
    let manager = match environment {
        Some(environment) => ConfigManager::load_from_directory_with_env(config_dir, environment)?,
        None => ConfigManager::load_from_directory(config_dir)?,
    };

    println!(
        "🔧 Configuration for environment '{}' from {}",
        manager.environment(),
        manager.config_directory().display()
    );
    println!("{}", serde_json::to_string_pretty(manager.config())?);
    Ok(())
}

async fn show_run(run_id: Uuid, state_dir: &Path) -> anyhow::Result<()> {
    let store = FileRunStore::new(state_dir);
    let Some(run) = store.load(run_id).await? else {
        bail!("run {run_id} not found in {}", state_dir.display());
    };

    println!("{}", serde_json::to_string_pretty(&run.summary())?);
    Ok(())
}
