use bucketq::{DeferredQueue, ItemId, MergeScheduler, QueueConfig, RedisStore};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "bq-admin")]
#[command(about = "Deferred bucket queue admin CLI", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "bucketq.yaml")]
    config: String,

    /// Redis URL (overrides the config file)
    #[arg(long, env = "BQ_REDIS_URL")]
    redis_url: Option<String>,

    /// Key prefix (overrides the config file)
    #[arg(long)]
    prefix: Option<String>,

    /// Output format (json, table)
    #[arg(short, long, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add ids to a queue
    Enqueue {
        /// Queue key
        key: String,

        /// Ids to add
        #[arg(required = true, num_args = 1..)]
        ids: Vec<ItemId>,
    },

    /// Claim pending ids of a queue
    Checkout {
        /// Queue key
        key: String,

        /// Release the drained buckets; without this the ids stay queued
        #[arg(long)]
        commit: bool,
    },

    /// Consolidate the buckets of a queue
    Merge {
        /// Queue key
        key: String,
    },

    /// Show the bucket index of a queue
    Inspect {
        /// Queue key
        key: String,
    },

    /// Merge the configured queues periodically until interrupted
    RunMerger {
        /// Interval in seconds (overrides the config file)
        #[arg(long)]
        interval: Option<u64>,

        /// Queue keys (override the config file)
        #[arg(long = "key")]
        keys: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = if std::path::Path::new(&args.config).exists() {
        QueueConfig::from_file(&args.config)?
    } else {
        QueueConfig::default()
    };

    if let Some(redis_url) = args.redis_url {
        config.store.redis_url = redis_url;
    }
    if let Some(prefix) = args.prefix {
        config.store.key_prefix = prefix;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.monitoring.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let store = RedisStore::connect(&config.store.redis_url).await?;
    let queue = Arc::new(DeferredQueue::new(Arc::new(store), &config)?);

    match args.command {
        Commands::Enqueue { key, ids } => {
            let count = ids.len();
            queue.enqueue(&key, ids).await?;

            match args.format.as_str() {
                "json" => println!("{}", serde_json::json!({ "key": key, "enqueued": count })),
                _ => println!("Enqueued {} ids to {}", count, key),
            }
        }

        Commands::Checkout { key, commit } => {
            let checkout = queue.checkout(&key).await?;
            let content = checkout.content().to_vec();
            let buckets = checkout.snapshot().len();

            if commit {
                checkout.commit().await?;
            } else {
                tracing::warn!("Checkout not committed, ids remain queued");
            }

            match args.format.as_str() {
                "json" => println!(
                    "{}",
                    serde_json::json!({
                        "key": key,
                        "buckets": buckets,
                        "committed": commit,
                        "content": content,
                    })
                ),
                _ => {
                    println!(
                        "Checked out {} ids from {} buckets{}",
                        content.len(),
                        buckets,
                        if commit { " (committed)" } else { "" }
                    );
                    for chunk in content.chunks(16) {
                        let line: Vec<String> = chunk.iter().map(ToString::to_string).collect();
                        println!("  {}", line.join(" "));
                    }
                }
            }
        }

        Commands::Merge { key } => {
            let report = queue.merge(&key).await?;

            match args.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&report)?),
                _ => println!(
                    "Merged {} buckets of {} ({} ids, token {})",
                    report.buckets_merged, report.key, report.items, report.token
                ),
            }
        }

        Commands::Inspect { key } => {
            let snapshot = queue.inspect(&key).await?;

            match args.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&snapshot)?),
                _ => {
                    let mut table = Table::new();
                    table.load_preset(UTF8_FULL);
                    table.set_header(vec!["#", "Bucket", "Created", "Ids"]);
                    for (position, bucket) in snapshot.buckets.iter().enumerate() {
                        let created = bucket
                            .created_at
                            .map(|at| at.to_rfc3339())
                            .unwrap_or_else(|| "-".to_string());
                        table.add_row(vec![
                            position.to_string(),
                            bucket.name.clone(),
                            created,
                            bucket.size.to_string(),
                        ]);
                    }
                    println!(
                        "Queue {} (index version {}, {})",
                        snapshot.key,
                        snapshot.version,
                        if snapshot.merging { "merging" } else { "idle" }
                    );
                    println!("{table}");
                    println!("Pending ids: {}", snapshot.pending());
                }
            }
        }

        Commands::RunMerger { interval, keys } => {
            let mut merger = config.merger.clone();
            if let Some(interval) = interval {
                merger.interval_secs = interval;
            }
            if !keys.is_empty() {
                merger.keys = keys;
            }
            if merger.keys.is_empty() {
                anyhow::bail!("No queue keys configured for the merger");
            }

            let scheduler = Arc::new(MergeScheduler::new(queue.clone(), &merger));
            let runner = scheduler.clone();
            let handle = tokio::spawn(async move { runner.run().await });

            tokio::signal::ctrl_c().await?;
            scheduler.shutdown();
            handle.await?;

            let metrics = queue.metrics();
            let mut buffer = Vec::new();
            TextEncoder::new().encode(&metrics.registry.gather(), &mut buffer)?;
            tracing::info!("Final merger metrics:\n{}", String::from_utf8_lossy(&buffer));
        }
    }

    Ok(())
}
