use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use tickd_api::{CheckpointStore, IngestStats, NodeClient, TickSink};
use tickd_client::TcpNodeClient;
use tickd_engine::config::StorageBackend;
use tickd_engine::{Supervisor, TickdConfig};
use tickd_storage::{ClickHouseStore, MemoryCheckpoint, MemorySink};

#[derive(Parser)]
#[command(name = "tickd", about = "Blockchain tick ingestion daemon")]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(long, default_value = "config.toml", env = "TICKD_CONFIG")]
    config: String,

    /// Subscribe at the upstream head, ignoring checkpoint and start tick.
    #[arg(long)]
    from_latest: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    tracing::info!(config = %cli.config, "loading configuration");
    let mut config = match TickdConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };
    if cli.from_latest {
        config.ingest.start_from_latest = true;
    }

    let stats = Arc::new(IngestStats::new());

    // --- Storage backend ---
    let (sink, checkpoints): (Arc<dyn TickSink>, Arc<dyn CheckpointStore>) =
        match config.storage.backend {
            StorageBackend::Clickhouse => {
                let store = match ClickHouseStore::new(
                    &config.storage.host,
                    config.storage.port,
                    &config.storage.user,
                    &config.storage.password,
                    &config.storage.database,
                    config.storage.tls,
                ) {
                    Ok(s) => Arc::new(s),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to create clickhouse store");
                        std::process::exit(1);
                    }
                };
                (store.clone(), store)
            }
            StorageBackend::Memory => {
                tracing::warn!("memory storage configured; data will not survive a restart");
                (Arc::new(MemorySink::new()), Arc::new(MemoryCheckpoint::new()))
            }
        };

    if let Err(e) = sink.init().await {
        tracing::error!(error = %e, "storage init failed");
        std::process::exit(1);
    }

    let client: Arc<dyn NodeClient> = Arc::new(TcpNodeClient::new(
        config.node.connect_timeout(),
        config.node.read_timeout(),
    ));

    let token = CancellationToken::new();

    // --- Status API ---
    if config.api.enabled {
        let api_stats = stats.clone();
        let api_token = token.clone();
        let port = config.api.port;
        tokio::spawn(async move {
            if let Err(e) = tickd_api_server::run(port, api_stats, api_token).await {
                tracing::error!(error = %e, "api server error");
            }
        });
        tracing::info!(port, "status api listening");
    }

    // --- Pipeline ---
    tracing::info!(
        nodes = config.node.hosts.len(),
        batch_size = config.ingest.batch_size,
        "starting ingestion pipeline"
    );
    let supervisor = Supervisor::new(client, sink, checkpoints, stats, config);
    let mut pipeline = tokio::spawn(supervisor.run(token.clone()));

    let mut result = None;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down...");
            token.cancel();
        }
        res = &mut pipeline => {
            token.cancel();
            result = Some(res);
        }
    }
    let result = match result {
        Some(res) => res,
        None => pipeline.await,
    };

    match result {
        Ok(Ok(())) => tracing::info!("shutdown complete"),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "ingestion failed");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!(error = %e, "pipeline task terminated abnormally");
            std::process::exit(1);
        }
    }
}
