//! Minter reconciler - the singleton DOI update consumer.
//!
//! Drains the status-change channel and applies DOI status transitions
//! to the local store. Run exactly one instance: the durable consumer
//! keeps redundant instances idle, but the deployment should still pin
//! this to a single member.
//!
//! Usage:
//!   minter-reconciler --nats-url nats://localhost:4222 --db-path minter.db

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use minter::channel::{ConsumerConfig, UpdateConsumer};
use minter::config::{Args, NatsArgs};
use minter::store::SqliteDoiStore;
use minter::types::MinterError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("minter={log_level},info").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {e}");
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Minter - DOI lifecycle engine");
    info!("  build {}", env!("GIT_COMMIT_SHORT"));
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!(
        "Mode: {}",
        if args.production_mode {
            "PRODUCTION"
        } else {
            "TEST"
        }
    );
    info!("DOI prefix: {}", args.effective_prefix());
    info!("NATS: {}", args.nats.nats_url);
    info!("Database: {}", args.db_path);
    info!("Retry budget: {} deliveries", args.max_deliver);
    info!("======================================");

    let store = match SqliteDoiStore::open(&args.db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open DOI store: {e}");
            std::process::exit(1);
        }
    };

    let nats_client = match connect_nats(&args.nats, &format!("minter-{}", args.node_id)).await {
        Ok(client) => client,
        Err(e) => {
            error!("NATS connection failed: {e}");
            std::process::exit(1);
        }
    };

    let consumer = Arc::new(UpdateConsumer::new(
        nats_client,
        store,
        ConsumerConfig {
            max_deliver: args.max_deliver,
            retry_delay: args.retry_delay(),
            ..Default::default()
        },
    ));

    let run_handle = {
        let consumer = consumer.clone();
        tokio::spawn(async move {
            if let Err(e) = consumer.run().await {
                error!("Consumer error: {e}");
            }
        })
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            consumer.stop().await;
        }
        result = run_handle => {
            if let Err(e) = result {
                error!("Consumer task error: {e}");
            }
        }
    }

    info!("Reconciler shutting down");
    Ok(())
}

/// Connect to NATS, failing fast when the broker is unreachable
async fn connect_nats(args: &NatsArgs, name: &str) -> Result<async_nats::Client, MinterError> {
    info!("Connecting to NATS at {}", args.nats_url);

    let mut options = async_nats::ConnectOptions::new()
        .name(name)
        .connection_timeout(Duration::from_secs(5));

    if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
        options = options.user_and_password(user.clone(), pass.clone());
    }

    let client = options
        .connect(&args.nats_url)
        .await
        .map_err(|e| MinterError::Nats(format!("failed to connect: {e}")))?;

    info!("Connected to NATS at {}", args.nats_url);
    Ok(client)
}
