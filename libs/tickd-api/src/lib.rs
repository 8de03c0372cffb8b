pub mod error;
pub mod node;
pub mod stats;
pub mod storage;
pub mod types;

pub use error::{ErrorKind, IngestError};
pub use node::{NodeClient, TickSubscription};
pub use stats::{IngestStats, StatsSnapshot};
pub use storage::{CheckpointStore, TickSink};
pub use types::{
    ConnectionState, IngestPhase, StartFrom, TickEvent, TickRecord, Transaction, now_ms,
};
