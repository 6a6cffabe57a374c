//! # Stepflow Configuration Validator
//!
//! Loads the layered configuration for an environment, validates it, and
//! optionally builds an engine from it to confirm every provider initializes.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use stepflow_core::execution::ActionRegistry;
use stepflow_core::providers::HealthStatus;
use stepflow_core::{ConfigManager, OrchestrationEngine};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate Stepflow configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate the configuration
    Validate,

    /// Print the effective configuration with secrets redacted
    Show,

    /// Build an engine from the configuration and health-check its providers
    Providers,
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

    let result = match cli.command.as_ref().unwrap_or(&Commands::Validate) {
        Commands::Validate => validate(&cli),
        Commands::Show => show(&cli),
        Commands::Providers => providers(&cli).await,
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {e:#}");
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> Result<Arc<ConfigManager>> {
    ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment)
        .with_context(|| format!("loading configuration for '{}'", cli.environment))
}

fn validate(cli: &Cli) -> Result<()> {
    println!("🔧 Validating Stepflow Configuration");
    println!("Environment: {}", cli.environment);

    let manager = load(cli)?;
    let config = manager.config();
    println!("Config Directory: {}", manager.config_directory().display());
    println!("✅ Configuration loaded and validated");
    println!("   providers:        {}", config.providers.len());
    println!("   retry attempts:   {}", config.retry.max_attempts);
    println!(
        "   circuit breakers: {}",
        if config.circuit_breakers.enabled { "enabled" } else { "disabled" }
    );
    println!(
        "   rate limiting:    {}",
        if config.rate_limit.enabled {
            config.rate_limit.algorithm.as_str()
        } else {
            "disabled"
        }
    );
    Ok(())
}

fn show(cli: &Cli) -> Result<()> {
    let manager = load(cli)?;
    let rendered = serde_json::to_string_pretty(&manager.debug_config())
        .context("rendering configuration")?;
    println!("{rendered}");
    Ok(())
}

async fn providers(cli: &Cli) -> Result<()> {
    let manager = load(cli)?;
    let engine = OrchestrationEngine::from_config(manager.config(), Arc::new(ActionRegistry::new()))
        .context("building engine from configuration")?;
    engine
        .initialize()
        .await
        .context("initializing providers")?;

    let health = engine.health_check().await;
    if health.is_empty() {
        bail!("no providers configured");
    }

    let mut unhealthy = 0;
    for (name, result) in &health {
        let marker = match result.status {
            HealthStatus::Healthy => "✅",
            HealthStatus::Unhealthy => {
                unhealthy += 1;
                "❌"
            }
        };
        println!("{marker} {name}: {} ({}ms)", result.status, result.response_time_ms);
        for (dependency, check) in &result.checks {
            println!(
                "     {dependency}: {}{}",
                check.status,
                check
                    .message
                    .as_deref()
                    .map(|m| format!(" - {m}"))
                    .unwrap_or_default()
            );
        }
    }

    engine.shutdown().await.context("shutting down providers")?;

    if unhealthy > 0 {
        bail!("{unhealthy} provider(s) unhealthy");
    }
    Ok(())
}
