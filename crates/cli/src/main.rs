//! Catalogue ETL command-line entry point

mod commands;

use anyhow::Context;
use catalog_etl_config::{ObservabilityConfig, PipelineConfig};
use clap::{Parser, Subcommand};
use commands::{ProvisionCommand, RunCommand, ValidateCommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "catalog-etl",
    version,
    about = "Stream product-catalogue changes into the catalogue database and topics"
)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, env = "CATALOG_ETL_CONFIG", global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline until interrupted
    #[command(name = "run")]
    Run(RunCommand),

    /// Materialize the trust store and exit
    #[command(name = "provision")]
    Provision(ProvisionCommand),

    /// Load and validate the configuration
    #[command(name = "validate-config")]
    ValidateConfig(ValidateCommand),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = PipelineConfig::load(cli.config.as_deref())
        .with_context(|| match &cli.config {
            Some(path) => format!("loading {}", path.display()),
            None => "loading configuration from the environment".to_string(),
        })?;

    init_tracing(&config.observability, cli.verbose);

    match cli.command {
        Commands::Run(command) => command.execute(config).await,
        Commands::Provision(command) => command.execute(&config).await,
        Commands::ValidateConfig(command) => command.execute(&config),
    }
}

/// Initialize tracing/logging; `RUST_LOG` wins over the configured level
fn init_tracing(config: &ObservabilityConfig, verbose: bool) {
    let default_level = if verbose { "debug" } else { config.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "processor={level},catalog_etl={level},warn",
            level = default_level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logging {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}
