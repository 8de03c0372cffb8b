use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use tickd_api::{CheckpointStore, IngestPhase, IngestStats, NodeClient, StartFrom, TickSink};

use crate::config::TickdConfig;
use crate::connection::ConnectionManager;
use crate::error::EngineError;
use crate::writer::BatchWriter;

/// Orchestrates the pipeline: resolves the starting tick, runs the
/// connection manager and batch writer concurrently (joined only by the
/// bounded record channel), and guarantees a drain on the way out.
///
/// Phases: `ResolvingStart → Running → Draining → Stopped`, with
/// `Running → Failed` on an unrecoverable error from either side.
pub struct Supervisor {
    client: Arc<dyn NodeClient>,
    sink: Arc<dyn TickSink>,
    checkpoints: Arc<dyn CheckpointStore>,
    stats: Arc<IngestStats>,
    config: TickdConfig,
}

impl Supervisor {
    pub fn new(
        client: Arc<dyn NodeClient>,
        sink: Arc<dyn TickSink>,
        checkpoints: Arc<dyn CheckpointStore>,
        stats: Arc<IngestStats>,
        config: TickdConfig,
    ) -> Self {
        Self { client, sink, checkpoints, stats, config }
    }

    /// Decide the starting tick. Precedence: explicit start-from-latest,
    /// then resume-from-checkpoint, then the configured start tick.
    pub async fn resolve_start(&self) -> Result<StartFrom, EngineError> {
        let ingest = &self.config.ingest;
        if ingest.start_from_latest {
            tracing::info!("starting at the upstream head (start_from_latest)");
            return Ok(StartFrom::Latest);
        }
        if ingest.resume {
            match self.checkpoints.load().await? {
                Some(checkpoint) => {
                    tracing::info!(checkpoint, "resuming after stored checkpoint");
                    return Ok(StartFrom::Tick(checkpoint + 1));
                }
                None => {
                    tracing::warn!(
                        start_tick = ingest.start_tick,
                        "resume requested but no checkpoint found; falling back to the \
                         configured start tick — that range will be re-ingested"
                    );
                }
            }
        }
        Ok(StartFrom::Tick(ingest.start_tick))
    }

    pub async fn run(self, token: CancellationToken) -> Result<(), EngineError> {
        self.stats.set_phase(IngestPhase::ResolvingStart);
        let start = self.resolve_start().await?;
        tracing::info!(start = %start, "start tick resolved");

        let (tx, rx) = mpsc::channel(self.config.ingest.channel_buffer);
        let child = token.child_token();

        let manager = ConnectionManager::new(
            self.client.clone(),
            self.config.node.hosts.clone(),
            tx,
            self.stats.clone(),
            &self.config.ingest,
        );
        let writer = BatchWriter::new(
            self.sink.clone(),
            self.checkpoints.clone(),
            self.stats.clone(),
            &self.config.ingest,
        );

        let mut manager_handle = tokio::spawn(manager.run(start, child.clone()));
        let mut writer_handle = tokio::spawn(writer.consume(rx, child.clone()));
        self.stats.set_phase(IngestPhase::Running);
        tracing::info!("pipeline running");

        let mut manager_res = None;
        let mut writer_res = None;
        tokio::select! {
            _ = token.cancelled() => {
                tracing::info!("shutdown requested");
            }
            res = &mut manager_handle => manager_res = Some(res),
            res = &mut writer_handle => writer_res = Some(res),
        }

        self.stats.set_phase(IngestPhase::Draining);
        child.cancel();

        let timeout = self.config.ingest.shutdown_timeout();
        if manager_res.is_none() {
            manager_res = join_within(timeout, &mut manager_handle, "connection manager").await;
        }
        if writer_res.is_none() {
            // The writer performs the final flush while it drains.
            writer_res = join_within(timeout, &mut writer_handle, "batch writer").await;
        }

        let mut failure: Option<EngineError> = None;
        evaluate("connection manager", manager_res, &mut failure);
        evaluate("batch writer", writer_res, &mut failure);

        match failure {
            None => {
                self.stats.set_phase(IngestPhase::Stopped);
                tracing::info!("pipeline stopped");
                Ok(())
            }
            Some(e) => {
                self.stats.set_phase(IngestPhase::Failed);
                tracing::error!(error = %e, "pipeline failed");
                Err(e)
            }
        }
    }
}

type TaskResult = Option<Result<Result<(), EngineError>, JoinError>>;

/// Join a task within the shutdown timeout; `None` means it had to be
/// aborted.
async fn join_within(
    timeout: Duration,
    handle: &mut JoinHandle<Result<(), EngineError>>,
    name: &'static str,
) -> TaskResult {
    match tokio::time::timeout(timeout, &mut *handle).await {
        Ok(res) => Some(res),
        Err(_) => {
            tracing::warn!(task = name, "did not stop within the shutdown timeout, aborting");
            handle.abort();
            None
        }
    }
}

fn evaluate(name: &'static str, res: TaskResult, failure: &mut Option<EngineError>) {
    match res {
        Some(Ok(Ok(()))) => tracing::debug!(task = name, "task finished"),
        Some(Ok(Err(e))) => {
            tracing::error!(task = name, error = %e, "task failed");
            if failure.is_none() {
                *failure = Some(e);
            }
        }
        Some(Err(join_err)) => {
            tracing::error!(task = name, error = %join_err, "task terminated abnormally");
            if failure.is_none() {
                *failure = Some(EngineError::Task { name, reason: join_err.to_string() });
            }
        }
        None => {
            if failure.is_none() {
                *failure =
                    Some(EngineError::Task { name, reason: "shutdown timeout".to_string() });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::testutil::{ScriptedClient, rec};
    use tickd_api::{ConnectionState, IngestError};
    use tickd_storage::{MemoryCheckpoint, MemorySink};

    struct Fixture {
        client: Arc<ScriptedClient>,
        sink: Arc<MemorySink>,
        checkpoints: Arc<MemoryCheckpoint>,
        stats: Arc<IngestStats>,
    }

    fn supervisor(ingest: IngestConfig) -> (Supervisor, Fixture) {
        let client = Arc::new(ScriptedClient::new());
        let sink = Arc::new(MemorySink::new());
        let checkpoints = Arc::new(MemoryCheckpoint::new());
        let stats = Arc::new(IngestStats::new());
        let config = TickdConfig {
            node: crate::config::NodeConfig {
                hosts: vec!["n1:1".into()],
                ..Default::default()
            },
            ingest,
            ..Default::default()
        };
        let sup = Supervisor::new(
            client.clone(),
            sink.clone(),
            checkpoints.clone(),
            stats.clone(),
            config,
        );
        (sup, Fixture { client, sink, checkpoints, stats })
    }

    #[tokio::test]
    async fn resume_prefers_checkpoint_over_configured_start() {
        let ingest = IngestConfig { start_tick: 0, resume: true, ..IngestConfig::default() };
        let (sup, fx) = supervisor(ingest);
        fx.checkpoints.set(100).await;

        assert_eq!(sup.resolve_start().await.unwrap(), StartFrom::Tick(101));
    }

    #[tokio::test]
    async fn start_from_latest_overrides_everything() {
        let ingest = IngestConfig {
            start_tick: 7,
            resume: true,
            start_from_latest: true,
            ..IngestConfig::default()
        };
        let (sup, fx) = supervisor(ingest);
        fx.checkpoints.set(100).await;

        assert_eq!(sup.resolve_start().await.unwrap(), StartFrom::Latest);
    }

    #[tokio::test]
    async fn resume_without_checkpoint_falls_back_to_configured_tick() {
        let ingest = IngestConfig { start_tick: 7, resume: true, ..IngestConfig::default() };
        let (sup, _fx) = supervisor(ingest);

        assert_eq!(sup.resolve_start().await.unwrap(), StartFrom::Tick(7));
    }

    #[tokio::test(start_paused = true)]
    async fn pipeline_runs_and_drains_cleanly() {
        let ingest = IngestConfig {
            start_tick: 0,
            resume: false,
            batch_size: 3,
            ..IngestConfig::default()
        };
        let (sup, fx) = supervisor(ingest);
        fx.client
            .push_subscription(vec![Ok(Some(rec(0))), Ok(Some(rec(1))), Ok(Some(rec(2)))]);

        let token = CancellationToken::new();
        let handle = tokio::spawn(sup.run(token.clone()));

        while fx.sink.batch_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(fx.stats.phase(), IngestPhase::Running);
        assert_eq!(fx.stats.connection_state(), ConnectionState::Subscribed);
        assert_eq!(fx.client.calls()[0].1, StartFrom::Tick(0));

        token.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(fx.sink.batches().await, vec![vec![0, 1, 2]]);
        assert_eq!(fx.checkpoints.value().await, Some(2));
        assert_eq!(fx.stats.phase(), IngestPhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_connection_error_fails_the_pipeline_after_drain() {
        let ingest = IngestConfig {
            resume: false,
            batch_size: 100,
            ..IngestConfig::default()
        };
        let (sup, fx) = supervisor(ingest);
        fx.client.push_subscription(vec![
            Ok(Some(rec(0))),
            Ok(Some(rec(1))),
            Err(IngestError::protocol("malformed frame")),
        ]);

        let result = sup.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(EngineError::Connection(_))));

        // The partial batch was still flushed on the way down.
        assert_eq!(fx.sink.batches().await, vec![vec![0, 1]]);
        assert_eq!(fx.stats.phase(), IngestPhase::Failed);
    }
}
