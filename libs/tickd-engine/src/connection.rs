use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tickd_api::{
    ConnectionState, IngestError, IngestStats, NodeClient, StartFrom, TickRecord,
    TickSubscription,
};

use crate::backoff::Backoff;
use crate::config::IngestConfig;
use crate::error::EngineError;

/// How an established subscription ended.
enum StreamEnd {
    /// Transport loss or recoverable upstream error — reconnect and resume.
    Lost(IngestError),
    /// Upstream closed the stream cleanly — reconnect and resume.
    Closed,
    /// Cancellation observed, or the consumer went away.
    Stopped,
}

/// Maintains exactly one logical subscription to the upstream tick
/// stream, self-healing across transient failures and across the
/// configured candidate nodes.
///
/// All reconnect/failover state lives here; the rest of the pipeline
/// only sees the ordered record channel.
pub struct ConnectionManager {
    client: Arc<dyn NodeClient>,
    nodes: Vec<String>,
    tx: mpsc::Sender<TickRecord>,
    stats: Arc<IngestStats>,
    backoff: Backoff,
    max_failed_rounds: u32,
    /// Tick of the last record pushed into the channel. Resume point
    /// after a mid-stream disconnect.
    last_forwarded: Option<u64>,
}

impl ConnectionManager {
    pub fn new(
        client: Arc<dyn NodeClient>,
        nodes: Vec<String>,
        tx: mpsc::Sender<TickRecord>,
        stats: Arc<IngestStats>,
        config: &IngestConfig,
    ) -> Self {
        Self {
            client,
            nodes,
            tx,
            stats,
            backoff: Backoff::new(config.reconnect_delay(), config.reconnect_delay_cap()),
            max_failed_rounds: config.max_failed_rounds.max(1),
            last_forwarded: None,
        }
    }

    /// Connect, subscribe and forward records until cancellation or an
    /// unrecoverable error. Dropping `self` on return closes the record
    /// channel, which terminates the consumer's read loop.
    pub async fn run(
        mut self,
        start: StartFrom,
        token: CancellationToken,
    ) -> Result<(), EngineError> {
        let mut resume = start;
        let mut failed_rounds: u32 = 0;
        let mut reconnecting = false;

        'rounds: loop {
            if token.is_cancelled() {
                break;
            }

            let mut streamed = false;
            for node in self.nodes.clone() {
                if token.is_cancelled() {
                    break 'rounds;
                }
                self.stats.set_connection_state(if reconnecting {
                    ConnectionState::Reconnecting
                } else {
                    ConnectionState::Connecting
                });
                tracing::debug!(node = %node, start = %resume, "connecting");

                let attempt = tokio::select! {
                    _ = token.cancelled() => break 'rounds,
                    res = self.client.subscribe(&node, resume) => res,
                };

                match attempt {
                    Ok(sub) => {
                        failed_rounds = 0;
                        self.backoff.reset();
                        self.stats.set_connection_state(ConnectionState::Subscribed);
                        tracing::info!(node = %node, start = %resume, "subscribed");
                        streamed = true;

                        match self.stream(sub, &token).await {
                            Ok(StreamEnd::Stopped) => break 'rounds,
                            Ok(StreamEnd::Lost(e)) => {
                                tracing::warn!(node = %node, error = %e, "stream lost");
                            }
                            Ok(StreamEnd::Closed) => {
                                tracing::warn!(node = %node, "upstream closed the stream");
                            }
                            Err(e) => {
                                self.stats.set_connection_state(ConnectionState::Disconnected);
                                return Err(e);
                            }
                        }

                        reconnecting = true;
                        self.stats.set_connection_state(ConnectionState::Reconnecting);
                        // Resume where the channel left off, not at the
                        // original start — anything earlier would either
                        // gap or duplicate.
                        if let Some(last) = self.last_forwarded {
                            resume = StartFrom::Tick(last + 1);
                        }
                        continue 'rounds;
                    }
                    Err(e) if e.is_retryable() => {
                        tracing::warn!(node = %node, error = %e, "connect failed, trying next candidate");
                    }
                    Err(e) => {
                        self.stats.set_connection_state(ConnectionState::Disconnected);
                        return Err(EngineError::Connection(e));
                    }
                }
            }

            if !streamed {
                failed_rounds += 1;
                if failed_rounds >= self.max_failed_rounds {
                    self.stats.set_connection_state(ConnectionState::Disconnected);
                    return Err(EngineError::Connection(IngestError::io(format!(
                        "all candidate nodes unreachable for {failed_rounds} consecutive rounds"
                    ))));
                }
                let delay = self.backoff.next_delay();
                tracing::warn!(
                    round = failed_rounds,
                    delay_ms = delay.as_millis() as u64,
                    "all candidates failed, backing off"
                );
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        self.stats.set_connection_state(ConnectionState::Disconnected);
        Ok(())
    }

    /// Forward records from one subscription until it ends.
    ///
    /// Records leave here in strictly increasing tick order: redelivered
    /// ticks after a resume are dropped, a forward gap is fatal.
    async fn stream(
        &mut self,
        mut sub: Box<dyn TickSubscription>,
        token: &CancellationToken,
    ) -> Result<StreamEnd, EngineError> {
        loop {
            let item = tokio::select! {
                _ = token.cancelled() => return Ok(StreamEnd::Stopped),
                item = sub.next() => item,
            };
            match item {
                Ok(Some(rec)) => {
                    if let Some(last) = self.last_forwarded {
                        if rec.tick <= last {
                            tracing::debug!(tick = rec.tick, "redelivered tick, dropping");
                            continue;
                        }
                        if rec.tick > last + 1 {
                            return Err(EngineError::TickGap { expected: last + 1, got: rec.tick });
                        }
                    }
                    let tick = rec.tick;
                    if self.tx.send(rec).await.is_err() {
                        // Consumer is gone; nothing left to feed.
                        return Ok(StreamEnd::Stopped);
                    }
                    self.last_forwarded = Some(tick);
                }
                Ok(None) => return Ok(StreamEnd::Closed),
                Err(e) if e.is_retryable() => return Ok(StreamEnd::Lost(e)),
                Err(e) => return Err(EngineError::Connection(e)),
            }
        }
    }
}
