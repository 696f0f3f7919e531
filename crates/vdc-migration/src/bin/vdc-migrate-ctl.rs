//! Org VDC migration control tool
//!
//! Validates, assesses and rolls back migration units described in the
//! configuration file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::error;
use vdc_event_bus::EventBus;
use vdc_migration::{
    exit, report_exit_code, Error, MigrationConfig, ProgressLogger, Result, Runner,
};
use vdc_shared_types::UnitId;

#[derive(Parser)]
#[command(name = "vdc-migrate-ctl")]
#[command(about = "Org VDC Migration Control Tool")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "/etc/vdc-migration/config.toml")]
    config: PathBuf,

    /// Restrict the command to one unit, as <org>/<org-vdc>
    #[arg(short, long)]
    unit: Option<UnitId>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the validation groups, stopping at the first failure
    Validate,

    /// Report every finding without side effects
    Assess {
        /// Print the reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the stored checkpoint of each unit
    Status,

    /// Forget stored checkpoints
    Reset,

    /// Undo side effects recorded in the checkpoints
    Rollback,

    /// Check the configuration file
    CheckConfig,

    /// Generate example configuration
    GenerateConfig {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    if let Commands::GenerateConfig { output } = &cli.command {
        return generate_config(output.as_deref());
    }

    let config = Arc::new(load_config(&cli.config)?);
    let units = match &cli.unit {
        Some(unit) => {
            config.unit(unit)?;
            vec![unit.clone()]
        }
        None => config.unit_ids(),
    };

    if let Commands::CheckConfig = cli.command {
        println!("Configuration is valid, {} unit(s)", units.len());
        return Ok(exit::SUCCESS);
    }

    let events = EventBus::new();
    let progress = ProgressLogger::new();
    progress.bind_event_bus(&events).await?;
    let runner = Runner::connect(config).await?.with_event_bus(events);

    let mut code = exit::SUCCESS;
    for unit in &units {
        let unit_code = match &cli.command {
            Commands::Validate => validate(&runner, unit).await,
            Commands::Assess { json } => assess(&runner, unit, *json).await,
            Commands::Status => status(&runner, unit).await,
            Commands::Reset => reset(&runner, unit).await,
            Commands::Rollback => rollback(&runner, unit).await,
            Commands::CheckConfig | Commands::GenerateConfig { .. } => Ok(exit::SUCCESS),
        };
        let unit_code = match unit_code {
            Ok(c) => c,
            Err(e) => {
                error!("[{}] {}", unit, e);
                eprintln!("{}: {}", unit, e);
                e.exit_code()
            }
        };
        code = code.max(unit_code);
    }

    let stats = progress.stats().await;
    log::info!(
        "groups: {} completed, {} skipped, {} failed; {} compensation(s)",
        stats.groups_completed,
        stats.groups_skipped,
        stats.groups_failed,
        stats.compensations
    );
    Ok(code)
}

fn load_config(path: &Path) -> Result<MigrationConfig> {
    let config = if path.exists() {
        MigrationConfig::load_from_file(path)?
    } else {
        log::warn!("{} not found, searching default locations", path.display());
        MigrationConfig::load_with_defaults()?
    };
    config.validate()?;
    Ok(config)
}

fn generate_config(output: Option<&Path>) -> Result<i32> {
    let config_toml = toml::to_string_pretty(&MigrationConfig::example())
        .map_err(|e| Error::Output(e.to_string()))?;

    match output {
        Some(output_path) => {
            std::fs::write(output_path, config_toml)?;
            println!(
                "Example configuration written to: {}",
                output_path.display()
            );
        }
        None => println!("{}", config_toml),
    }
    Ok(exit::SUCCESS)
}

async fn validate(runner: &Runner, unit: &UnitId) -> Result<i32> {
    let report = runner.validate(unit).await?;
    println!("{}", report.summary());
    Ok(report_exit_code(&report))
}

async fn assess(runner: &Runner, unit: &UnitId, json: bool) -> Result<i32> {
    let report = runner.assess(unit).await?;
    if json {
        let text =
            serde_json::to_string_pretty(&report).map_err(|e| Error::Output(e.to_string()))?;
        println!("{}", text);
    } else {
        println!("{}", report.summary());
    }
    Ok(report_exit_code(&report))
}

async fn status(runner: &Runner, unit: &UnitId) -> Result<i32> {
    let Some(checkpoint) = runner.status(unit).await? else {
        println!("{}: no checkpoint", unit);
        return Ok(exit::SUCCESS);
    };

    println!("{} (saved {})", unit, checkpoint.saved_at.to_rfc3339());
    for (name, record) in &checkpoint.tasks {
        println!("  {:<32} {:?}", name, record.status);
        for (sub, status) in &record.sub_results {
            println!("    {:<30} {:?}", sub, status);
        }
    }
    Ok(exit::SUCCESS)
}

async fn reset(runner: &Runner, unit: &UnitId) -> Result<i32> {
    runner.reset(unit).await?;
    println!("{}: checkpoint removed", unit);
    Ok(exit::SUCCESS)
}

async fn rollback(runner: &Runner, unit: &UnitId) -> Result<i32> {
    let report = runner.rollback(unit).await?;
    if report.is_empty() {
        println!("{}: nothing to undo", unit);
        return Ok(exit::SUCCESS);
    }
    for action in &report.executed {
        println!("{}: undone {}", unit, action);
    }
    for action in &report.failed {
        println!("{}: FAILED to undo {}", unit, action);
    }
    Ok(if report.failed.is_empty() {
        exit::SUCCESS
    } else {
        exit::FATAL
    })
}
