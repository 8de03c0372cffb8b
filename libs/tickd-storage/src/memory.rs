use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::RwLock;

use tickd_api::{CheckpointStore, IngestError, TickRecord, TickSink};

/// In-memory sink for tests and dry runs. Upserts by tick, mirroring
/// the ReplacingMergeTree semantics of the real backend, and records
/// each flushed batch for inspection.
pub struct MemorySink {
    ticks: RwLock<BTreeMap<u64, TickRecord>>,
    batches: RwLock<Vec<Vec<u64>>>,
    fail_next: AtomicU32,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            ticks: RwLock::new(BTreeMap::new()),
            batches: RwLock::new(Vec::new()),
            fail_next: AtomicU32::new(0),
        }
    }

    /// Make the next `n` insert calls fail.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub async fn tick_count(&self) -> usize {
        self.ticks.read().await.len()
    }

    pub async fn ticks(&self) -> Vec<u64> {
        self.ticks.read().await.keys().copied().collect()
    }

    pub async fn batch_count(&self) -> usize {
        self.batches.read().await.len()
    }

    /// Tick lists of the successfully inserted batches, in flush order.
    pub async fn batches(&self) -> Vec<Vec<u64>> {
        self.batches.read().await.clone()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSink for MemorySink {
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn insert_batch(
        &self,
        records: &[TickRecord],
    ) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + '_>> {
        let records = records.to_vec();
        Box::pin(async move {
            if self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(IngestError::storage("injected insert failure"));
            }

            let mut ticks = self.ticks.write().await;
            let mut batches = self.batches.write().await;
            batches.push(records.iter().map(|r| r.tick).collect());
            for record in records {
                ticks.insert(record.tick, record);
            }
            Ok(())
        })
    }
}

/// In-memory checkpoint store with failure injection for tests.
pub struct MemoryCheckpoint {
    value: RwLock<Option<u64>>,
    fail_next: AtomicU32,
}

impl MemoryCheckpoint {
    pub fn new() -> Self {
        Self { value: RwLock::new(None), fail_next: AtomicU32::new(0) }
    }

    /// Preload a stored checkpoint, as if left by a previous run.
    pub async fn set(&self, tick: u64) {
        *self.value.write().await = Some(tick);
    }

    pub async fn value(&self) -> Option<u64> {
        *self.value.read().await
    }

    /// Make the next `n` store calls fail.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }
}

impl Default for MemoryCheckpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointStore for MemoryCheckpoint {
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Option<u64>, IngestError>> + Send + '_>> {
        Box::pin(async { Ok(*self.value.read().await) })
    }

    fn store(
        &self,
        tick: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + '_>> {
        Box::pin(async move {
            if self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(IngestError::storage("injected checkpoint failure"));
            }
            *self.value.write().await = Some(tick);
            Ok(())
        })
    }
}
