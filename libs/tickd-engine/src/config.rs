use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineError;

/// Root configuration — parsed from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TickdConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl TickdConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{path}: {e}")))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        let config: TickdConfig =
            toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.node.hosts.is_empty() {
            return Err(EngineError::Config("[node] hosts must not be empty".into()));
        }
        if self.ingest.batch_size == 0 {
            return Err(EngineError::Config("[ingest] batch_size must be >= 1".into()));
        }
        if self.ingest.channel_buffer == 0 {
            return Err(EngineError::Config("[ingest] channel_buffer must be >= 1".into()));
        }
        Ok(())
    }
}

// ---- [node] ----

/// Upstream node candidates and per-attempt timeouts.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Candidate node endpoints, tried in order.
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Max silence on an established stream before the connection is
    /// considered lost.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl NodeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_read_timeout_ms() -> u64 {
    30_000
}

// ---- [ingest] ----

/// Pipeline knobs: start resolution, batching, reconnect and retry caps.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Tick to start from when neither `start_from_latest` nor a
    /// checkpoint applies.
    #[serde(default)]
    pub start_tick: u64,
    /// Skip the backlog and subscribe at the upstream head.
    #[serde(default)]
    pub start_from_latest: bool,
    /// Resume after the stored checkpoint when one exists.
    #[serde(default = "default_true")]
    pub resume: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Capacity of the manager → writer channel.
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
    /// Initial reconnect backoff delay; doubles per failed round.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_reconnect_delay_cap_ms")]
    pub reconnect_delay_cap_ms: u64,
    /// Consecutive rounds with every candidate failing before the
    /// outage is escalated to fatal.
    #[serde(default = "default_max_failed_rounds")]
    pub max_failed_rounds: u32,
    #[serde(default = "default_flush_retry_attempts")]
    pub flush_retry_attempts: u32,
    #[serde(default = "default_flush_retry_delay_ms")]
    pub flush_retry_delay_ms: u64,
    #[serde(default = "default_checkpoint_retry_attempts")]
    pub checkpoint_retry_attempts: u32,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            start_tick: 0,
            start_from_latest: false,
            resume: default_true(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            channel_buffer: default_channel_buffer(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            reconnect_delay_cap_ms: default_reconnect_delay_cap_ms(),
            max_failed_rounds: default_max_failed_rounds(),
            flush_retry_attempts: default_flush_retry_attempts(),
            flush_retry_delay_ms: default_flush_retry_delay_ms(),
            checkpoint_retry_attempts: default_checkpoint_retry_attempts(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl IngestConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn reconnect_delay_cap(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_cap_ms)
    }

    pub fn flush_retry_delay(&self) -> Duration {
        Duration::from_millis(self.flush_retry_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn default_true() -> bool {
    true
}
fn default_batch_size() -> usize {
    500
}
fn default_flush_interval_ms() -> u64 {
    1_000
}
fn default_channel_buffer() -> usize {
    1_024
}
fn default_reconnect_delay_ms() -> u64 {
    500
}
fn default_reconnect_delay_cap_ms() -> u64 {
    30_000
}
fn default_max_failed_rounds() -> u32 {
    30
}
fn default_flush_retry_attempts() -> u32 {
    3
}
fn default_flush_retry_delay_ms() -> u64 {
    500
}
fn default_checkpoint_retry_attempts() -> u32 {
    3
}
fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

// ---- [storage] ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Clickhouse,
    /// Volatile, for tests and dry runs only.
    Memory,
}

/// Sink coordinates. Interpreted by the binary; the engine treats this
/// section as plain data.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    #[serde(default = "default_ch_host")]
    pub host: String,
    #[serde(default = "default_ch_port")]
    pub port: u16,
    #[serde(default = "default_ch_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_ch_database")]
    pub database: String,
    #[serde(default)]
    pub tls: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            host: default_ch_host(),
            port: default_ch_port(),
            user: default_ch_user(),
            password: String::new(),
            database: default_ch_database(),
            tls: false,
        }
    }
}

fn default_backend() -> StorageBackend {
    StorageBackend::Clickhouse
}
fn default_ch_host() -> String {
    "127.0.0.1".into()
}
fn default_ch_port() -> u16 {
    8123
}
fn default_ch_user() -> String {
    "default".into()
}
fn default_ch_database() -> String {
    "default".into()
}

// ---- [api] ----

/// Status/health HTTP API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { enabled: default_api_enabled(), port: default_api_port() }
    }
}

fn default_api_enabled() -> bool {
    true
}
fn default_api_port() -> u16 {
    9200
}
