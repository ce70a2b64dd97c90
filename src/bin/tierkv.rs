//! tierkv command line tool

use anyhow::Context;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tierkv::common::{Config, MetricsCollector, SystemClock, TracingSink};
use tierkv::shard::build_chain;
use tierkv::{Expiration, RecordEnvelope, StoreCoordinator};
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tierkv")]
#[command(about = "Tiered key/value store coordinator")]
struct Cli {
    /// TOML file describing the tier chain
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a key through the tier chain
    Get {
        #[arg(long)]
        table: String,
        /// Key as hex
        #[arg(long)]
        key: String,
        /// Do not refresh last-use time
        #[arg(long)]
        skip_touch: bool,
    },
    /// Write a key to the primary tier
    Put {
        #[arg(long)]
        table: String,
        /// Key as hex
        #[arg(long)]
        key: String,
        #[arg(long)]
        value: String,
        /// Sliding expiration in days (negative disables)
        #[arg(long, default_value = "-1", allow_negative_numbers = true)]
        sliding_days: i32,
        /// Absolute expiration (RFC 3339)
        #[arg(long)]
        expires_at: Option<DateTime<Utc>>,
    },
    /// Delete a key from every tier
    Delete {
        #[arg(long)]
        table: String,
        /// Key as hex
        #[arg(long)]
        key: String,
    },
    /// Read commands from stdin: `get|put|del <table> <hex-key> [value]`, `stats`
    Shell,
}

fn parse_key(raw: &str) -> anyhow::Result<Vec<u8>> {
    hex::decode(raw).with_context(|| format!("key must be hex: {}", raw))
}

fn print_envelope(env: &RecordEnvelope<Bytes>) {
    match env.value() {
        Some(value) => println!(
            "{}\t(last_use={}, sliding_days={}, expires_at={})",
            String::from_utf8_lossy(value),
            env.last_use_utc().to_rfc3339(),
            env.sliding_expiration_days(),
            env.absolute_expiration_utc()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".into())
        ),
        None => println!("(not found)"),
    }
}

async fn run_shell(coord: &StoreCoordinator) -> anyhow::Result<()> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let result = match parts.as_slice() {
            [] => continue,
            ["stats"] => {
                print!("{}", coord.metrics().to_prometheus());
                Ok(())
            }
            ["get", table, key] => match parse_key(key) {
                Ok(key) => coord
                    .get_raw(table, &key, false)
                    .await
                    .map(|env| print_envelope(&env))
                    .map_err(anyhow::Error::from),
                Err(e) => Err(e),
            },
            ["put", table, key, value @ ..] if !value.is_empty() => match parse_key(key) {
                Ok(key) => coord
                    .put_raw(table, &key, value.join(" "), Expiration::never())
                    .await
                    .map(|_| println!("OK"))
                    .map_err(anyhow::Error::from),
                Err(e) => Err(e),
            },
            ["del", table, key] => match parse_key(key) {
                Ok(key) => coord
                    .delete(table, &key)
                    .await
                    .map(|deleted| println!("{}", deleted))
                    .map_err(anyhow::Error::from),
                Err(e) => Err(e),
            },
            _ => Err(anyhow::anyhow!("unrecognized command: {}", line)),
        };
        if let Err(e) = result {
            eprintln!("error: {:#}", e);
        }
    }
    Ok(())
}

async fn run(coord: &StoreCoordinator, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Get {
            table,
            key,
            skip_touch,
        } => {
            let key = parse_key(&key)?;
            let env = coord.get_raw(&table, &key, skip_touch).await?;
            print_envelope(&env);
        }
        Commands::Put {
            table,
            key,
            value,
            sliding_days,
            expires_at,
        } => {
            let key = parse_key(&key)?;
            let expiration = Expiration {
                sliding_days,
                absolute_utc: expires_at,
            };
            coord.put_raw(&table, &key, value, expiration).await?;
            println!("OK");
        }
        Commands::Delete { table, key } => {
            let key = parse_key(&key)?;
            println!("{}", coord.delete(&table, &key).await?);
        }
        Commands::Shell => run_shell(coord).await?,
    }
    Ok(())
}

/// Run one command, then stop the coordinator whatever the outcome so the
/// final metrics flush always happens
async fn execute(coord: &StoreCoordinator, command: Commands) -> anyhow::Result<()> {
    let outcome = run(coord, command).await;
    coord.stop().await?;
    outcome
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let clock = Arc::new(SystemClock);
    let chain = build_chain(&config.tiers, clock.clone())?;
    let coord = StoreCoordinator::with_parts(
        config.coordinator.clone(),
        Arc::new(MetricsCollector::new()),
        Arc::new(TracingSink),
        clock,
    );
    coord.configure(chain)?;
    coord.start()?;

    execute(&coord, cli.command).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierkv::common::{CounterKind, MemorySink};
    use tierkv::coordinator::{CoordinatorState, TierChain, TierSpec};
    use tierkv::shard::MemShard;
    use tierkv::{CoordinatorConfig, Shard};

    fn instrumented(sink: Arc<MemorySink>) -> StoreCoordinator {
        let config = CoordinatorConfig {
            instrumentation: true,
            metrics_interval: std::time::Duration::from_secs(3600),
            ..CoordinatorConfig::default()
        };
        let coord = StoreCoordinator::with_parts(
            config,
            Arc::new(MetricsCollector::new()),
            sink,
            Arc::new(SystemClock),
        );
        let chain =
            TierChain::build(vec![TierSpec::new(vec![Arc::new(MemShard::new("m")) as Arc<dyn Shard>])])
                .unwrap();
        coord.configure(chain).unwrap();
        coord.start().unwrap();
        coord
    }

    #[tokio::test]
    async fn test_failed_command_still_stops() {
        let sink = Arc::new(MemorySink::new());
        let coord = instrumented(sink.clone());
        coord.get_raw("t", b"k", false).await.unwrap();

        let bad_key = Commands::Get {
            table: "t".into(),
            key: "not-hex".into(),
            skip_touch: false,
        };
        assert!(execute(&coord, bad_key).await.is_err());
        assert_eq!(coord.state(), CoordinatorState::Stopped);
        assert_eq!(sink.total(CounterKind::Miss, "t"), 1);
    }

    #[tokio::test]
    async fn test_successful_command_stops() {
        let sink = Arc::new(MemorySink::new());
        let coord = instrumented(sink.clone());
        let put = Commands::Put {
            table: "t".into(),
            key: "0102".into(),
            value: "v".into(),
            sliding_days: -1,
            expires_at: None,
        };
        execute(&coord, put).await.unwrap();
        assert_eq!(coord.state(), CoordinatorState::Stopped);
        assert_eq!(sink.total(CounterKind::Put, "t"), 1);
    }
}
