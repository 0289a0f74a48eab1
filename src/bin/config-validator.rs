//! # Orchestrator Configuration Validator
//!
//! Command-line tool for validating orchestrator configuration files across environments.
//! Catches configuration issues before the reconciliation service is started.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use subscription_orchestrator::config::{ConfigManager, OrchestratorConfig};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate subscription orchestrator configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production, ...)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: $ORCHESTRATOR_CONFIG_DIR or ./config)
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
    /// Load and validate the merged configuration
    Validate,

    /// Print the merged configuration as JSON
    Show,

    /// Compare the merged configuration of two environments
    Compare {
        /// Base environment for comparison
        #[arg(short, long, default_value = "development")]
        base: String,

        /// Target environment for comparison
        #[arg(short, long)]
        target: String,
    },
}

fn main() {
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
        Some(Commands::Validate) | None => validate(&cli),
        Some(Commands::Show) => show(&cli),
        Some(Commands::Compare { base, target }) => compare(&cli, base, target),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {:#}", e);
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli, environment: &str) -> anyhow::Result<std::sync::Arc<ConfigManager>> {
    ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), environment)
        .with_context(|| format!("loading configuration for environment '{environment}'"))
}

fn validate(cli: &Cli) -> anyhow::Result<()> {
    println!("🔧 Validating Orchestrator Configuration");
    println!("Environment: {}", cli.environment);

    let manager = load(cli, &cli.environment)?;
    println!("Config Directory: {}", manager.config_directory().display());
    println!("✅ Configuration loaded and validated");
    println!();
    print_summary(manager.config(), &cli.environment);
    Ok(())
}

fn show(cli: &Cli) -> anyhow::Result<()> {
    let manager = load(cli, &cli.environment)?;
    let rendered = serde_json::to_string_pretty(&manager.debug_config())?;
    println!("{rendered}");
    Ok(())
}

fn compare(cli: &Cli, base: &str, target: &str) -> anyhow::Result<()> {
    let base_config = serde_json::to_value(load(cli, base)?.config())?;
    let target_config = serde_json::to_value(load(cli, target)?.config())?;

    println!("🔍 Comparing '{base}' → '{target}'");
    let mut differences = Vec::new();
    diff_values("", &base_config, &target_config, &mut differences);

    if differences.is_empty() {
        println!("✅ No differences");
    } else {
        for (path, from, to) in &differences {
            println!("  {path}: {from} → {to}");
        }
        println!("{} setting(s) differ", differences.len());
    }
    Ok(())
}

fn diff_values(
    path: &str,
    base: &serde_json::Value,
    target: &serde_json::Value,
    differences: &mut Vec<(String, String, String)>,
) {
    match (base, target) {
        (serde_json::Value::Object(b), serde_json::Value::Object(t)) => {
            for (key, base_value) in b {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                let target_value = t.get(key).unwrap_or(&serde_json::Value::Null);
                diff_values(&child, base_value, target_value, differences);
            }
        }
        _ if base != target => {
            differences.push((path.to_string(), base.to_string(), target.to_string()));
        }
        _ => {}
    }
}

fn print_summary(config: &OrchestratorConfig, environment: &str) {
    println!("📋 Discovery");
    println!("  trigger activity:      {}", config.discovery.trigger_activity_type);
    println!("  topic property:        {}", config.discovery.topic_property);
    println!("  subscription property: {}", config.discovery.subscription_property);
    println!("  empty key policy:      {:?}", config.discovery.empty_key_policy);
    println!("📋 Pool");
    println!("  reconcile strategy:    {:?}", config.pool.reconcile_strategy);
    println!("  contention policy:     {:?}", config.pool.contention_policy);
    println!("  settle messages:       {}", config.pool.settle_messages);
    println!("📋 Service");
    println!("  reconcile on startup:  {}", config.service.reconcile_on_startup);
    println!(
        "  termination poll:      {}ms",
        config.service.termination_poll_interval_ms
    );
    println!("📋 Logging");
    println!(
        "  level:                 {}",
        config.logging.effective_level(environment)
    );
    println!("  json:                  {}", config.logging.json);
}
