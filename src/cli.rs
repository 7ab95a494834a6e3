use clap::{Parser, Subcommand};
use std::io::{stdout, Write};

use crate::cluster::{ClusterDetector, ClusterKeys};
use crate::config::ClusterConfig;
use crate::domain::Chain;
use crate::error::Result;
use crate::store::TtlStore;

#[derive(Parser)]
#[command(name = "cluster-signals")]
#[command(version = "0.1.0")]
#[command(about = "Detect trusted-wallet buy clusters from a trade event stream", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding default.toml and per-environment overrides
    #[arg(short, long, default_value = "config", env = "CLUSTER_CONFIG_DIR")]
    pub config_dir: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest JSON-lines trade events and print cluster signals
    Run {
        /// Input file, or "-" for stdin
        #[arg(short, long, default_value = "-")]
        input: String,
    },
    /// Show the cluster state of a token
    State {
        #[arg(long, value_parser = parse_chain)]
        chain: Chain,
        /// Token address
        #[arg(long)]
        token: String,
        /// Point in time (Unix ms) selecting the window; defaults to now
        #[arg(long)]
        at_ms: Option<i64>,
    },
    /// Print the store keys an event would touch
    Keys {
        #[arg(long, value_parser = parse_chain)]
        chain: Chain,
        /// Token address
        #[arg(long)]
        token: String,
        /// Event timestamp (Unix ms)
        #[arg(long)]
        timestamp_ms: i64,
    },
}

fn parse_chain(s: &str) -> std::result::Result<Chain, String> {
    Chain::try_from(s)
}

/// Print derived keys for one (chain, token, timestamp)
pub fn print_keys(
    chain: Chain,
    token: &str,
    timestamp_ms: i64,
    config: &ClusterConfig,
) -> Result<()> {
    config.validate()?;
    let keys = ClusterKeys::derive(chain, token, timestamp_ms, config.window_minutes);

    let mut out = stdout().lock();
    writeln!(out, "bucket_start: {}", keys.bucket_start)?;
    writeln!(out, "bucket_key:   {}", keys.bucket_key)?;
    writeln!(out, "cooldown_key: {}", keys.cooldown_key)?;
    writeln!(out, "signal_id:    {}", keys.signal_id)?;
    Ok(())
}

/// Print the lifecycle state and live bucket of a token
pub async fn show_token_state<S: TtlStore>(
    detector: &ClusterDetector<S>,
    chain: Chain,
    token: &str,
    at_ms: i64,
    config: &ClusterConfig,
) -> Result<()> {
    let state = detector.token_state(chain, token, at_ms, config).await?;
    println!("{} {} at {}: {}", chain, token, at_ms, state);
    println!("  suppressed: {}", state.is_suppressed());
    println!("  next:       {}", state.valid_transitions().join(", "));

    if let Some(bucket) = detector.load_bucket(chain, token, at_ms, config).await? {
        for wallet in &bucket.wallets {
            println!(
                "  {} trust={} added_at={}",
                wallet.address,
                wallet
                    .trust_score
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                wallet.added_at
            );
        }
    }
    Ok(())
}
