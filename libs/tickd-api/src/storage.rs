use std::future::Future;
use std::pin::Pin;

use crate::error::IngestError;
use crate::types::TickRecord;

/// Durable sink for tick batches.
///
/// `insert_batch` must be atomic per call and idempotent by tick: the
/// writer replays the last unacknowledged batch after a crash, and the
/// sink must absorb the overlap without duplicating rows.
pub trait TickSink: Send + Sync {
    /// Create tables / prepare the backend. Called once at startup.
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + '_>>;

    /// Persist an ordered batch. All records become visible or none do.
    fn insert_batch(
        &self,
        records: &[TickRecord],
    ) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + '_>>;
}

/// Durable record of the last successfully persisted tick.
///
/// Read once at startup, written once per successful flush. The stored
/// value is monotonically non-decreasing.
pub trait CheckpointStore: Send + Sync {
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Option<u64>, IngestError>> + Send + '_>>;

    fn store(
        &self,
        tick: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + '_>>;
}
