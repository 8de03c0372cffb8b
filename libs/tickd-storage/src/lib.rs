pub mod clickhouse;
pub mod memory;

pub use clickhouse::ClickHouseStore;
pub use memory::{MemoryCheckpoint, MemorySink};
