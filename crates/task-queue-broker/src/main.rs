use clap::Parser;
use std::sync::Arc;
use task_queue_broker::{Rdb, SchedulerConfig};
use task_queue_store::RedisStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tq-scheduler")]
#[command(about = "Promotes due scheduled and retry tasks onto their queues", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "scheduler.yaml")]
    config: String,

    /// Redis connection URL
    #[arg(long)]
    redis_url: Option<String>,

    /// Polling interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Requeue in-progress tasks left by crashed workers before polling
    #[arg(long)]
    recover: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = if std::path::Path::new(&args.config).exists() {
        SchedulerConfig::from_file(&args.config)?
    } else {
        SchedulerConfig::default()
    };

    if let Some(redis_url) = args.redis_url {
        config.redis_url = redis_url;
    }
    if let Some(interval_ms) = args.interval_ms {
        config.poll_interval_ms = interval_ms;
    }
    if args.recover {
        config.recover_on_startup = true;
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    tracing::info!("Starting scheduler with config: {:?}", config);

    let store = RedisStore::connect(&config.redis_url).await?;
    let rdb = Rdb::with_config(Arc::new(store), config.rdb.clone());

    if config.recover_on_startup {
        let restored = rdb.requeue_all().await?;
        tracing::info!("Recovery sweep restored {} tasks", restored);
    }

    let mut ticker = tokio::time::interval(config.poll_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = rdb.check_and_enqueue(config.queues.as_slice()).await {
                    tracing::error!("Failed to promote due tasks: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down scheduler");
                break;
            }
        }
    }

    Ok(())
}
