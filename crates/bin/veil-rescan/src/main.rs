use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use tracing::{info, warn};
use veil_notes::PoolId;
use veil_sync::{
    ImportProgress, PoolConfig, ReconstructionCoordinator, RpcLogSource, RunStatus, SledStore,
    SyncConfig, NullSink,
};
use veil_tree::{short_hex, Blake3Hasher, Sha256Hasher, TreeHasher};

#[derive(Parser, Debug)]
#[command(name = "veil-rescan")]
#[command(about = "rebuild shielded pool state from chain logs", long_about = None)]
struct Args {
    /// pools file (toml)
    #[arg(long, default_value = "./veil.toml")]
    config: PathBuf,

    /// sled database path
    #[arg(long, default_value = "./veil.db")]
    db_path: String,

    /// JSON-RPC endpoint for chains without one in the pools file
    #[arg(long, env = "VEIL_RPC_URL")]
    rpc_url: Option<String>,

    /// node hash the pools were built with
    #[arg(long, value_enum, default_value_t = HashKind::Sha256)]
    hasher: HashKind,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum HashKind {
    Sha256,
    Blake3,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// rescan from deployment (or the last checkpoint) and rebuild trees
    Reconstruct {
        /// resume from stored checkpoints instead of deployment blocks
        #[arg(long)]
        from_checkpoint: bool,

        /// only these pools, as `currency-denomination@chain`
        #[arg(long = "pool")]
        pools: Vec<String>,
    },
    /// append new events since the last checkpoint
    Sync {
        #[arg(long = "pool")]
        pools: Vec<String>,
    },
    /// print stored roots and notes
    Status,
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    #[serde(default)]
    sync: SyncConfig,
    #[serde(default)]
    endpoints: Vec<Endpoint>,
    pools: Vec<PoolConfig>,
}

#[derive(Debug, Deserialize)]
struct Endpoint {
    chain_id: u64,
    url: String,
}

impl FileConfig {
    fn load(path: &PathBuf) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: FileConfig =
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        if config.pools.is_empty() {
            bail!("{} defines no pools", path.display());
        }
        Ok(config)
    }
}

/// resolve `currency-denomination@chain` against the configured pools
fn select_pools(all: &[PoolId], wanted: &[String]) -> Result<Vec<PoolId>> {
    if wanted.is_empty() {
        return Ok(all.to_vec());
    }
    wanted
        .iter()
        .map(|name| {
            all.iter()
                .find(|p| p.to_string() == name.to_lowercase())
                .cloned()
                .with_context(|| format!("no pool named {}", name))
        })
        .collect()
}

fn log_progress(progress: &ImportProgress) {
    info!(
        "{}: blocks {}-{} processed to {}, {} deposits, {} withdrawals ({} orphaned)",
        progress.pool_id,
        progress.from_block,
        progress.to_block,
        progress.processed_block,
        progress.deposits,
        progress.withdrawals,
        progress.orphaned
    );
    for error in &progress.errors {
        warn!("{}: blocks {} failed: {}", progress.pool_id, error.range, error.cause);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "veil_rescan=info,veil_sync=info".into()),
        )
        .init();

    let args = Args::parse();
    info!("starting veil-rescan");
    info!("config: {}", args.config.display());
    info!("database: {}", args.db_path);

    match args.hasher {
        HashKind::Sha256 => run(args, Sha256Hasher).await,
        HashKind::Blake3 => run(args, Blake3Hasher).await,
    }
}

async fn run<H: TreeHasher + 'static>(args: Args, hasher: H) -> Result<()> {
    let file = FileConfig::load(&args.config)?;

    let mut source = RpcLogSource::new();
    for endpoint in &file.endpoints {
        info!("chain {} via {}", endpoint.chain_id, endpoint.url);
        source = source.with_endpoint(endpoint.chain_id, &endpoint.url);
    }
    if let Some(url) = &args.rpc_url {
        for pool in &file.pools {
            if !file.endpoints.iter().any(|e| e.chain_id == pool.chain_id()) {
                source = source.with_endpoint(pool.chain_id(), url);
            }
        }
    }

    let store = SledStore::open(&args.db_path)?;
    let coordinator = ReconstructionCoordinator::new(
        file.pools,
        hasher,
        file.sync,
        Arc::new(source),
        Arc::new(store),
        Arc::new(NullSink),
    )?;
    coordinator.restore().await?;

    match args.command {
        Command::Reconstruct { from_checkpoint, pools } => {
            let pools = select_pools(&coordinator.pools(), &pools)?;
            let run_id = coordinator.start_reconstruction(&pools, from_checkpoint)?;
            info!("{} started, ctrl-c to cancel", run_id);

            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            let done = loop {
                tokio::select! {
                    done = coordinator.wait(run_id) => break done?,
                    _ = tokio::signal::ctrl_c() => {
                        warn!("cancelling {}", run_id);
                        coordinator.cancel(run_id)?;
                    }
                    _ = ticker.tick() => {
                        for progress in coordinator.progress(run_id)?.pools.values() {
                            log_progress(progress);
                        }
                    }
                }
            };

            for progress in done.pools.values() {
                log_progress(progress);
            }
            match done.status {
                RunStatus::Completed => info!("{} completed", run_id),
                RunStatus::Cancelled => warn!("{} cancelled, state saved at last chunk", run_id),
                RunStatus::Failed(reason) => bail!("{} failed: {}", run_id, reason),
                RunStatus::Running => bail!("{} still running", run_id),
            }
            print_status(&coordinator, &pools).await;
        }
        Command::Sync { pools } => {
            let pools = select_pools(&coordinator.pools(), &pools)?;
            for progress in coordinator.sync(&pools).await? {
                log_progress(&progress);
            }
            print_status(&coordinator, &pools).await;
        }
        Command::Status => {
            let pools = coordinator.pools();
            print_status(&coordinator, &pools).await;
        }
    }

    Ok(())
}

async fn print_status<H: TreeHasher + 'static>(
    coordinator: &ReconstructionCoordinator<H>,
    pools: &[PoolId],
) {
    for pool in pools {
        let root = coordinator
            .root(pool)
            .await
            .map(|r| short_hex(&r))
            .unwrap_or_else(|| "none".into());
        let leaves = coordinator.leaf_count(pool).await.unwrap_or(0);
        let notes = coordinator.notes(pool).await;
        info!(
            "{}: root {} ({} leaves), {} notes, spendable {}",
            pool,
            root,
            leaves,
            notes.len(),
            coordinator.spendable_balance(pool).await
        );
        for note in notes {
            info!(
                "  {} leaf {:?} {:?}",
                note.commitment,
                note.leaf_index,
                note.status
            );
        }
    }
}
