use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// OCR - leader-driven oracle reporting
#[derive(Parser)]
#[command(name = "ocr")]
#[command(about = "OCR committee tools and local simulation")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a configuration with freshly generated committee keys
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "ocr.json")]
        output: PathBuf,

        /// Committee size
        #[arg(short = 'n', long, default_value_t = 4)]
        oracles: usize,

        /// Maximum number of faulty oracles
        #[arg(short, long, default_value_t = 1)]
        faulty: usize,
    },

    /// Generate a new keypair
    Keygen {
        /// Output file for secret key
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the configuration digest and the leaders of the first epochs
    Digest {
        /// Path to configuration file
        #[arg(short, long, default_value = "ocr.json")]
        config: PathBuf,

        /// Number of epochs to list leaders for
        #[arg(long, default_value_t = 5)]
        epochs: u64,
    },

    /// Run the whole committee in-process over a simulated network
    Simulate {
        /// Path to configuration file
        #[arg(short, long, default_value = "ocr.json")]
        config: PathBuf,

        /// Override the configured duration (milliseconds)
        #[arg(short, long)]
        duration_ms: Option<u64>,

        /// Override the configured drop rate
        #[arg(long)]
        drop_rate: Option<f64>,
    },
}
