use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use tickd_api::{CheckpointStore, IngestStats, TickRecord, TickSink};

use crate::config::IngestConfig;
use crate::error::EngineError;

/// Converts the inbound ordered record stream into durable,
/// atomically-flushed batches and advances the checkpoint after each
/// flush.
///
/// A batch flushes when it reaches `batch_size`, when `flush_interval`
/// elapses, or when the stream transitions from catch-up to live —
/// whichever comes first. Flushing is synchronous from the writer's
/// perspective; no two flushes overlap.
pub struct BatchWriter {
    sink: Arc<dyn TickSink>,
    checkpoints: Arc<dyn CheckpointStore>,
    stats: Arc<IngestStats>,
    batch_size: usize,
    flush_interval: Duration,
    flush_retry_attempts: u32,
    flush_retry_delay: Duration,
    checkpoint_retry_attempts: u32,
    batch: Vec<TickRecord>,
    last_flushed: Option<u64>,
    catching_up: bool,
}

impl BatchWriter {
    pub fn new(
        sink: Arc<dyn TickSink>,
        checkpoints: Arc<dyn CheckpointStore>,
        stats: Arc<IngestStats>,
        config: &IngestConfig,
    ) -> Self {
        Self {
            sink,
            checkpoints,
            stats,
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval(),
            flush_retry_attempts: config.flush_retry_attempts.max(1),
            flush_retry_delay: config.flush_retry_delay(),
            checkpoint_retry_attempts: config.checkpoint_retry_attempts.max(1),
            batch: Vec::new(),
            last_flushed: None,
            catching_up: false,
        }
    }

    /// Read records until the channel closes or cancellation fires,
    /// then drain: remaining queued records and the partial batch are
    /// flushed before returning.
    pub async fn consume(
        mut self,
        mut rx: mpsc::Receiver<TickRecord>,
        token: CancellationToken,
    ) -> Result<(), EngineError> {
        let mut deadline = Instant::now() + self.flush_interval;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => {
                    if !self.batch.is_empty() {
                        self.flush().await?;
                    }
                    deadline = Instant::now() + self.flush_interval;
                }
                rec = rx.recv() => match rec {
                    Some(rec) => {
                        self.accept(rec).await?;
                        if self.batch.is_empty() {
                            deadline = Instant::now() + self.flush_interval;
                        }
                    }
                    None => break,
                }
            }
        }

        while let Ok(rec) = rx.try_recv() {
            self.accept(rec).await?;
        }
        self.flush().await?;
        tracing::info!(checkpoint = self.last_flushed, "batch writer stopped");
        Ok(())
    }

    /// Append one record, enforcing the no-gap invariant and the
    /// catch-up → live transition flush.
    async fn accept(&mut self, rec: TickRecord) -> Result<(), EngineError> {
        let expected = self
            .batch
            .last()
            .map(|r| r.tick + 1)
            .or_else(|| self.last_flushed.map(|t| t + 1));
        if let Some(expected) = expected {
            if rec.tick != expected {
                return Err(EngineError::TickGap { expected, got: rec.tick });
            }
        }

        if self.catching_up && !rec.is_catch_up && !self.batch.is_empty() {
            tracing::info!(tick = rec.tick, "caught up to live head, flushing backlog");
            self.flush().await?;
        }
        self.catching_up = rec.is_catch_up;

        self.batch.push(rec);
        if self.batch.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Flush the in-flight batch with bounded retries; exhaustion is
    /// fatal. On success the checkpoint advances to the batch's last
    /// tick.
    async fn flush(&mut self) -> Result<(), EngineError> {
        let Some(last) = self.batch.last().map(|r| r.tick) else {
            return Ok(());
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.sink.insert_batch(&self.batch).await {
                Ok(()) => break,
                Err(e) if attempt < self.flush_retry_attempts => {
                    tracing::warn!(attempt, error = %e, "batch flush failed, retrying");
                    tokio::time::sleep(self.flush_retry_delay).await;
                }
                Err(e) => {
                    return Err(EngineError::FlushExhausted {
                        attempts: self.flush_retry_attempts,
                        source: e,
                    });
                }
            }
        }

        self.stats.add_ticks(self.batch.len() as u64);
        tracing::debug!(records = self.batch.len(), up_to = last, "flushed batch");
        self.batch.clear();
        self.last_flushed = Some(last);
        self.store_checkpoint(last).await;
        Ok(())
    }

    /// Checkpoint failures don't halt ingestion: the data is durable,
    /// and a restart replays at most the one unacknowledged batch,
    /// which the sink absorbs idempotently.
    async fn store_checkpoint(&self, tick: u64) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.checkpoints.store(tick).await {
                Ok(()) => {
                    self.stats.set_checkpoint(tick);
                    return;
                }
                Err(e) if attempt < self.checkpoint_retry_attempts => {
                    tracing::warn!(attempt, error = %e, "checkpoint write failed, retrying");
                    tokio::time::sleep(self.flush_retry_delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        tick,
                        error = %e,
                        "checkpoint write failed; a restart will replay the last batch"
                    );
                    return;
                }
            }
        }
    }
}
