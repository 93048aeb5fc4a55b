use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod config;
mod paper;
mod sim;

use config::{ConfigLoader, SimulationConfig};

#[derive(Parser)]
#[command(name = "flexlev")]
#[command(about = "Leveraged-position rebalancing engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a keeper simulation over a configured price path
    Simulate {
        /// Config file path; the built-in default scenario runs when the
        /// file does not exist
        #[arg(short, long, default_value = "config/Simulation.toml")]
        config: String,
    },
    /// Validate a configuration file and report invariant violations
    CheckConfig {
        /// Config file path
        #[arg(short, long, default_value = "config/Simulation.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Simulate { config } => {
            let config = if std::path::Path::new(&config).exists() {
                ConfigLoader::load(&config)?
            } else {
                tracing::info!(path = %config, "config file not found, using default scenario");
                SimulationConfig::default()
            };
            let report = sim::run_simulation(config).await?;
            println!(
                "simulation complete: {} ticks, final leverage {}x, ripcord payouts {}",
                report.ticks, report.final_leverage_ratio, report.ripcord_payouts
            );
        }
        Commands::CheckConfig { config } => {
            let config = ConfigLoader::load(&config)?;
            config.validate()?;
            println!(
                "configuration OK: target {}x in [{}x, {}x], {} exchange(s)",
                config.methodology.target_leverage_ratio,
                config.methodology.min_leverage_ratio,
                config.methodology.max_leverage_ratio,
                config.exchanges.len()
            );
        }
    }
    Ok(())
}
