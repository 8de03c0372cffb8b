//! Newline-delimited JSON frames spoken with the upstream node.

use serde::{Deserialize, Serialize};

use tickd_api::{StartFrom, TickRecord};

/// Client → node: subscription request, first line on the connection.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubscribeFrame {
    pub subscribe: SubscribeBody,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubscribeBody {
    /// Absent = subscribe at the upstream head.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_tick: Option<u64>,
}

impl SubscribeFrame {
    pub fn new(start: StartFrom) -> Self {
        let from_tick = match start {
            StartFrom::Latest => None,
            StartFrom::Tick(t) => Some(t),
        };
        Self { subscribe: SubscribeBody { from_tick } }
    }
}

/// Node → client frames, one JSON object per line.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeFrame {
    /// Subscription accepted.
    Ack(AckBody),
    Tick(TickRecord),
    Error(ErrorBody),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AckBody {
    /// Upstream head when the subscription was accepted; records behind
    /// it are catch-up.
    pub head_tick: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    /// True for conditions the client must not retry (bad protocol
    /// version, rejected credentials).
    #[serde(default)]
    pub fatal: bool,
}
