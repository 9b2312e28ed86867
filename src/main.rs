//! Command-line checks for ledgerlink settings, credentials and API reachability.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use std::path::PathBuf;
use std::time::Duration;

use ledgerlink::probe::HttpReachability;
use ledgerlink::validation::validate_auth_details;
use ledgerlink::ClientSettings;

#[derive(Parser)]
#[command(name = "ledgerlink")]
#[command(about = "Check ledgerlink client settings, credentials and API reachability")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a TOML settings file and print the effective settings
    CheckSettings {
        file: PathBuf,
    },

    /// Validate a JSON file holding `{ "key": ..., "secret": ... }`
    CheckAuth {
        file: PathBuf,
    },

    /// Check once whether the API answers
    Probe {
        url: String,

        /// Request timeout in seconds
        #[arg(short, long, default_value = "5")]
        timeout: u64,
    },
}

fn init_logger(level: LevelFilter) {
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { LevelFilter::Debug } else { LevelFilter::Warn };

    match cli.command {
        Commands::CheckSettings { file } => {
            let settings = ClientSettings::load(&file)
                .with_context(|| format!("Invalid settings in {}", file.display()))?;
            init_logger(settings.log_level().max(default_level));
            info!("Settings loaded from {}", file.display());
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Commands::CheckAuth { file } => {
            init_logger(default_level);
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let value: serde_json::Value =
                serde_json::from_str(&text).with_context(|| format!("{} is not JSON", file.display()))?;
            let details = validate_auth_details(&value)?;
            println!("Credentials for key {} are well-formed", details.key);
        }
        Commands::Probe { url, timeout } => {
            init_logger(default_level);
            let probe = HttpReachability::parse(&url, Duration::from_secs(timeout))?;
            let report = probe.check().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_reachable() {
                bail!("{} is unreachable", url);
            }
        }
    }

    Ok(())
}
