use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;
mod config;
mod network;
mod node;

use cli::{Cli, Commands};
use config::{generate_sample_config, NodeConfig};
use node::Simulation;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            output,
            oracles,
            faulty,
        } => {
            init_config(output, oracles, faulty)?;
        }
        Commands::Keygen { output } => {
            generate_keypair(output)?;
        }
        Commands::Digest { config, epochs } => {
            show_digest(&config, epochs)?;
        }
        Commands::Simulate {
            config,
            duration_ms,
            drop_rate,
        } => {
            simulate(&config, duration_ms, drop_rate).await?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<NodeConfig> {
    info!("Loading configuration from {:?}", path);
    if !path.exists() {
        error!(
            "Configuration file not found: {:?}. Run 'ocr init' to create one.",
            path
        );
        return Err(anyhow::anyhow!("Configuration file not found"));
    }
    NodeConfig::load(path)
}

/// Initialize a new configuration file
fn init_config(output: PathBuf, oracles: usize, faulty: usize) -> Result<()> {
    info!("Generating configuration for {} oracles", oracles);

    let config = generate_sample_config(oracles, faulty);
    config.validate()?;
    config.save(&output)?;

    println!("\nConfiguration file created: {}", output.display());
    println!("  Config digest: {}", config.digest()?);
    println!("\nTo run the committee locally, run:");
    println!("  ocr simulate --config {}", output.display());

    Ok(())
}

/// Generate a new keypair
fn generate_keypair(output: Option<PathBuf>) -> Result<()> {
    let keypair = ocr_core::KeyPair::generate();

    println!("Generated new keypair:");
    println!("  Public key:  {}", keypair.public.to_hex());
    println!("  Secret key:  {}", keypair.secret.to_hex());

    if let Some(path) = output {
        std::fs::write(&path, keypair.secret.to_hex())?;
        info!("Secret key saved to {:?}", path);
    }

    println!("\nWARNING: Keep your secret key safe! Do not share it with anyone.");

    Ok(())
}

/// Show the configuration digest and leader schedule
fn show_digest(path: &Path, epochs: u64) -> Result<()> {
    let config = load_config(path)?;
    config.validate()?;
    let ctx = config.context_for(ocr_core::OracleId(0))?;

    println!("Config digest: {}", ctx.config_digest);
    println!("Committee: n={} f={} quorum={}", ctx.n, ctx.f, ctx.quorum());
    for (i, key) in ctx.committee.keys().iter().enumerate() {
        println!("  oracle#{}: {}", i, key.to_hex());
    }
    println!("Leaders:");
    for epoch in 1..=epochs {
        println!("  epoch {}: {}", epoch, ctx.leader(epoch));
    }

    Ok(())
}

/// Run the committee in-process
async fn simulate(path: &Path, duration_ms: Option<u64>, drop_rate: Option<f64>) -> Result<()> {
    let mut config = load_config(path)?;
    if let Some(rate) = drop_rate {
        config.simulation.drop_rate = rate;
    }
    let duration = Duration::from_millis(duration_ms.unwrap_or(config.simulation.duration_ms));

    let simulation = Simulation::new(config)?;
    let summary = simulation.run(duration).await?;

    println!("\nSimulation finished:");
    println!("  Rounds reported: {}", summary.rounds());
    println!("  Reports agree:   {}", summary.consistent());
    println!(
        "  Messages:        {} sent, {} received, {} rejected",
        summary.sent, summary.received, summary.violations
    );
    for (oracle_id, epoch) in &summary.epochs {
        println!(
            "  {}: epoch {}, {} reports",
            oracle_id,
            epoch,
            summary.reports_by(*oracle_id)
        );
    }

    Ok(())
}
