use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// API log anomaly detector: Isolation Forest scoring over access logs
#[derive(Parser)]
#[command(name = "anomaly-detector", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP service
    Serve {
        /// Port to bind (overrides ANOMALY_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Train a model offline from a JSON file and publish it to the model directory
    Train {
        /// JSON array of log records, or an object with a `logs` array
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value_t = 0.2)]
        test_size: f64,
    },

    /// Score a JSON file of log records against the persisted model
    Detect {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value_t = -0.5, allow_hyphen_values = true)]
        threshold: f64,
        /// Print only the flagged records
        #[arg(long)]
        only_anomalies: bool,
    },

    /// Show the persisted model's status
    Status,
}
