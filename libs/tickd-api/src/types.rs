use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════
//  Tick data model
// ════════════════════════════════════════════════════════════════

/// One transaction carried by a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction hash (hex, lowercase).
    pub hash: String,
    /// Source address.
    pub source: String,
    /// Destination address.
    pub dest: String,
    /// Transferred amount in base units.
    pub amount: u64,
    /// Transaction input type discriminator.
    #[serde(default)]
    pub input_type: u16,
    /// Raw input payload; a base64 string over the wire.
    #[serde(default, with = "payload_b64", skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
}

mod payload_b64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)
    }
}

/// One log/event entry emitted while executing a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickEvent {
    /// Hash of the transaction that emitted the event, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Event type discriminator.
    pub kind: u32,
    /// Event payload as structured JSON.
    pub data: serde_json::Value,
}

/// One unit of upstream data: a tick and everything executed in it.
///
/// Produced by the connection manager on frame receipt, consumed exactly
/// once by the batch writer, immutable in between.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    /// Monotonically increasing sequence number.
    pub tick: u64,
    /// Epoch the tick belongs to.
    #[serde(default)]
    pub epoch: u32,
    /// Upstream timestamp (Unix ms).
    pub ts_ms: i64,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub events: Vec<TickEvent>,
    /// True while the record was produced behind the upstream head.
    #[serde(default)]
    pub is_catch_up: bool,
}

/// Where to begin a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFrom {
    /// Begin at the upstream head, skipping backlog.
    Latest,
    /// Begin at a specific tick.
    Tick(u64),
}

impl std::fmt::Display for StartFrom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartFrom::Latest => f.write_str("latest"),
            StartFrom::Tick(t) => write!(f, "{t}"),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Pipeline state
// ════════════════════════════════════════════════════════════════

/// Connection manager state. Owned by the manager, observed read-only
/// through the stats snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
    Reconnecting,
}

impl ConnectionState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Subscribed => 2,
            ConnectionState::Reconnecting => 3,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Subscribed,
            3 => ConnectionState::Reconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Subscribed => f.write_str("subscribed"),
            ConnectionState::Reconnecting => f.write_str("reconnecting"),
        }
    }
}

/// Supervisor lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestPhase {
    ResolvingStart,
    Running,
    Draining,
    Stopped,
    Failed,
}

impl IngestPhase {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            IngestPhase::ResolvingStart => 0,
            IngestPhase::Running => 1,
            IngestPhase::Draining => 2,
            IngestPhase::Stopped => 3,
            IngestPhase::Failed => 4,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => IngestPhase::Running,
            2 => IngestPhase::Draining,
            3 => IngestPhase::Stopped,
            4 => IngestPhase::Failed,
            _ => IngestPhase::ResolvingStart,
        }
    }
}

impl std::fmt::Display for IngestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestPhase::ResolvingStart => f.write_str("resolving_start"),
            IngestPhase::Running => f.write_str("running"),
            IngestPhase::Draining => f.write_str("draining"),
            IngestPhase::Stopped => f.write_str("stopped"),
            IngestPhase::Failed => f.write_str("failed"),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Utilities
// ════════════════════════════════════════════════════════════════

/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
