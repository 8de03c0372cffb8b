use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use serde::Serialize;

use crate::types::{ConnectionState, IngestPhase};

/// Pipeline observability state.
///
/// Each field is written only by the task that owns the underlying value
/// (connection state by the connection manager, checkpoint and tick count
/// by the batch writer, phase by the supervisor); everyone else reads a
/// point-in-time `snapshot()`.
#[derive(Debug)]
pub struct IngestStats {
    connection_state: AtomicU8,
    phase: AtomicU8,
    ticks_processed: AtomicU64,
    checkpoint: AtomicU64,
    has_checkpoint: AtomicBool,
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            connection_state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
            phase: AtomicU8::new(IngestPhase::ResolvingStart.as_u8()),
            ticks_processed: AtomicU64::new(0),
            checkpoint: AtomicU64::new(0),
            has_checkpoint: AtomicBool::new(false),
        }
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        self.connection_state.store(state.as_u8(), Ordering::Relaxed);
    }

    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.connection_state.load(Ordering::Relaxed))
    }

    pub fn set_phase(&self, phase: IngestPhase) {
        self.phase.store(phase.as_u8(), Ordering::Relaxed);
    }

    pub fn phase(&self) -> IngestPhase {
        IngestPhase::from_u8(self.phase.load(Ordering::Relaxed))
    }

    pub fn add_ticks(&self, n: u64) {
        self.ticks_processed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_checkpoint(&self, tick: u64) {
        self.checkpoint.store(tick, Ordering::Relaxed);
        self.has_checkpoint.store(true, Ordering::Relaxed);
    }

    pub fn checkpoint(&self) -> Option<u64> {
        if self.has_checkpoint.load(Ordering::Relaxed) {
            Some(self.checkpoint.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connection_state: self.connection_state(),
            phase: self.phase(),
            ticks_processed: self.ticks_processed.load(Ordering::Relaxed),
            checkpoint: self.checkpoint(),
        }
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`IngestStats`], serializable for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub connection_state: ConnectionState,
    pub phase: IngestPhase,
    pub ticks_processed: u64,
    pub checkpoint: Option<u64>,
}
