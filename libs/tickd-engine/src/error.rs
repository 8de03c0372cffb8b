use tickd_api::IngestError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("connection failed permanently: {0}")]
    Connection(IngestError),

    #[error("tick gap: expected {expected}, got {got}")]
    TickGap { expected: u64, got: u64 },

    #[error("batch flush failed after {attempts} attempts: {source}")]
    FlushExhausted { attempts: u32, source: IngestError },

    #[error("task '{name}' terminated abnormally: {reason}")]
    Task { name: &'static str, reason: String },

    #[error("{0}")]
    Ingest(#[from] IngestError),
}
