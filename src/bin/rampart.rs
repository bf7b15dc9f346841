//! rampart — inspect configuration and classification
//!
//! Offline helper for operators: validates config files and shows how a
//! raw upstream failure would be classified.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rampart::{Classifier, Config, RawError};
use serde_json::json;

/// Rampart CLI
#[derive(Parser)]
#[command(name = "rampart")]
#[command(version)]
#[command(about = "Rampart resilience layer tooling")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load and validate a config file, print the effective settings
    Check {
        /// Config file (default: ~/.rampart/config.toml, then /etc/rampart/config.toml)
        #[arg(short, long, env = "RAMPART_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Classify a raw upstream failure
    Classify {
        /// Error message as reported upstream
        #[arg(short, long)]
        message: String,
        /// HTTP status, if any
        #[arg(short, long)]
        status: Option<u16>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let output = match args.command {
        Command::Check { config } => {
            let config = Config::load(config.as_deref())?;
            serde_json::to_value(&config)?
        }
        Command::Classify { message, status } => {
            let mut raw = RawError::new(message);
            if let Some(status) = status {
                raw = raw.with_status(status);
            }
            let err = Classifier::new()?.enhance(&raw, "cli", "classify");
            json!({
                "kind": err.kind,
                "code": err.code(),
                "retryable": err.retryable,
                "message": err.message,
                "user_message": err.user_message(),
                "retry_after_secs": err.retry_after().map(|d| d.as_secs()),
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
