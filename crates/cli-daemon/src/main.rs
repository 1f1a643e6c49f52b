use anyhow::{bail, Context, Result};
use cavtc_daemon::{
    config::QueueConfig,
    scan::{self, ScanOptions},
    worker::{self, Worker},
    Collection, CommandTranscoder, IdPolicy, Store, StoreError,
};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::PathBuf;

/// Shared-queue transcoding: enqueue media files, run workers, inspect and
/// repair the job store
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Job store file (overrides the configuration)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Queue every media file in a directory
    Enqueue {
        /// Directory to scan (defaults to the current directory)
        dir: Option<PathBuf>,
        /// Descend into subdirectories, skipping exempt ones
        #[arg(short, long)]
        recursive: bool,
        /// Place new jobs at the smallest free queue ids
        #[arg(long)]
        gap_fill: bool,
    },
    /// Print every row of a collection (queue, running, completed, failed)
    Show {
        collection: Collection,
        /// One JSON object per line instead of `|`-separated fields
        #[arg(long)]
        json: bool,
    },
    /// Delete one row by id
    Rmid { collection: Collection, id: i64 },
    /// Empty a collection and restart its ids at 1
    Reset { collection: Collection },
    /// Move running or failed jobs back into the queue
    Retry {
        collection: Collection,
        /// Requeue only this row
        #[arg(long)]
        id: Option<i64>,
    },
    /// Row count per collection
    Counts,
    /// Run a worker until killed
    Server {
        /// Worker identity recorded on claimed jobs (defaults to the host name)
        #[arg(long)]
        identity: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    let mut cfg = QueueConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(db) = args.db {
        cfg.db_path = db;
    }

    let mut store = Store::open(&cfg.db_path, cfg.busy_timeout())
        .with_context(|| format!("Failed to open job store: {}", cfg.db_path.display()))?;

    match args.command {
        Command::Enqueue { dir, recursive, gap_fill } => {
            let root = match dir {
                Some(dir) => dir,
                None => std::env::current_dir().context("Failed to read current directory")?,
            };
            let root = std::path::absolute(&root)
                .with_context(|| format!("Failed to resolve {}", root.display()))?;
            if !root.is_dir() {
                bail!("Not a directory: {}", root.display());
            }

            let jobs = scan::enumerate(&root, &ScanOptions::from_config(&cfg, recursive));
            if jobs.is_empty() {
                info!("No media files found in {}", root.display());
                return Ok(());
            }

            let policy = if gap_fill { IdPolicy::GapFill } else { IdPolicy::Sequential };
            let ids = store
                .enqueue(jobs, policy)
                .context("Failed to enqueue jobs; nothing was added")?;
            println!("Queued {} job(s) from {}", ids.len(), root.display());
        }

        Command::Show { collection, json } => {
            for row in store.list(collection)? {
                if json {
                    println!("{}", serde_json::to_string(&row)?);
                } else {
                    println!("{}", row.to_line());
                }
            }
        }

        Command::Rmid { collection, id } => {
            if store.delete(collection, id)? {
                info!("Deleted {} #{}", collection, id);
            } else {
                warn!("{} #{} not found, nothing deleted", collection, id);
            }
        }

        Command::Reset { collection } => {
            store.reset(collection)?;
            println!("Reset {}", collection);
        }

        Command::Retry { collection, id } => {
            let result = match id {
                Some(id) => store.retry_one(collection, id).map(|queue_id| {
                    println!("Requeued {} #{} as queue #{}", collection, id, queue_id);
                }),
                None => store.retry(collection).map(|count| {
                    println!("Requeued {} job(s) from {}", count, collection);
                }),
            };
            match result {
                Ok(()) => {}
                Err(e @ StoreError::EmptySource(_)) => bail!("{}", e),
                Err(e) => return Err(e).context("Retry failed"),
            }
        }

        Command::Counts => {
            let counts = store.counts()?;
            for c in Collection::ALL {
                println!("{}|{}", c, counts.get(c));
            }
        }

        Command::Server { identity } => {
            let identity = identity
                .or_else(|| cfg.worker_identity.clone())
                .unwrap_or_else(worker::default_identity);

            info!("cavtc worker starting");
            info!("  Store: {}", cfg.db_path.display());
            info!("  Identity: {}", identity);
            info!(
                "  Transcoder: {} {:?}",
                cfg.transcoder_program.display(),
                cfg.transcoder_args
            );
            info!(
                "  Idle backoff: {}-{} ms",
                cfg.backoff_min_ms, cfg.backoff_max_ms
            );

            let transcoder = CommandTranscoder::from_config(&cfg);
            let mut worker = Worker::new(store, transcoder, identity, cfg.backoff());
            if let Err(e) = worker.run().await {
                error!("Worker terminated: {}", e);
                return Err(e).context("Job store failure");
            }
        }
    }

    Ok(())
}
