use std::future::Future;
use std::pin::Pin;

use base64::Engine;

use tickd_api::{CheckpointStore, IngestError, TickRecord, TickSink, now_ms};

const SQL_CREATE_TICKS: &str = include_str!("../sql/create_ticks.sql");
const SQL_CREATE_TRANSACTIONS: &str = include_str!("../sql/create_transactions.sql");
const SQL_CREATE_EVENTS: &str = include_str!("../sql/create_events.sql");
const SQL_CREATE_CHECKPOINT: &str = include_str!("../sql/create_checkpoint.sql");

/// Singleton row id in `ingest_checkpoint`.
const CHECKPOINT_ID: &str = "ingest";

/// Escape a string value for safe use inside a ClickHouse single-quoted
/// literal. Prevents SQL injection by escaping `\` and `'`.
fn escape_ch_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// ClickHouse-backed sink and checkpoint store over the HTTP interface.
///
/// All tables use ReplacingMergeTree keyed by tick, so re-inserting an
/// already-flushed range is an upsert rather than a duplicate. That is
/// what makes checkpoint-replay after a crash safe.
pub struct ClickHouseStore {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
    database: String,
}

impl ClickHouseStore {
    pub fn new(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        database: &str,
        tls: bool,
    ) -> Result<Self, IngestError> {
        let scheme = if tls { "https" } else { "http" };
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| IngestError::config(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: format!("{scheme}://{host}:{port}"),
            user: user.to_string(),
            password: password.to_string(),
            database: database.to_string(),
        })
    }

    async fn exec(&self, sql: &str) -> Result<String, IngestError> {
        let resp = self
            .http
            .post(&self.base_url)
            .query(&[
                ("user", self.user.as_str()),
                ("password", self.password.as_str()),
                ("database", self.database.as_str()),
            ])
            .body(sql.to_owned())
            .send()
            .await
            .map_err(|e| IngestError::storage(format!("CH request: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| IngestError::storage(format!("CH read: {e}")))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(IngestError::storage(body))
        }
    }

    fn ticks_insert(records: &[TickRecord]) -> String {
        let values: Vec<String> = records
            .iter()
            .map(|r| {
                format!(
                    "({}, {}, {}, {}, {})",
                    r.tick,
                    r.epoch,
                    r.ts_ms,
                    r.transactions.len(),
                    r.events.len(),
                )
            })
            .collect();
        format!(
            "INSERT INTO ticks (tick, epoch, ts_ms, tx_count, event_count) VALUES {}",
            values.join(","),
        )
    }

    fn transactions_insert(records: &[TickRecord]) -> Option<String> {
        let values: Vec<String> = records
            .iter()
            .flat_map(|r| {
                r.transactions.iter().map(move |tx| {
                    let payload = base64::engine::general_purpose::STANDARD.encode(&tx.payload);
                    format!(
                        "({}, '{}', '{}', '{}', {}, {}, '{}')",
                        r.tick,
                        escape_ch_string(&tx.hash),
                        escape_ch_string(&tx.source),
                        escape_ch_string(&tx.dest),
                        tx.amount,
                        tx.input_type,
                        payload,
                    )
                })
            })
            .collect();
        if values.is_empty() {
            return None;
        }
        Some(format!(
            "INSERT INTO tick_transactions (tick, hash, source, dest, amount, input_type, payload) VALUES {}",
            values.join(","),
        ))
    }

    fn events_insert(records: &[TickRecord]) -> Option<String> {
        let values: Vec<String> = records
            .iter()
            .flat_map(|r| {
                r.events.iter().enumerate().map(move |(seq, ev)| {
                    let data = ev.data.to_string();
                    format!(
                        "({}, {}, '{}', {}, '{}')",
                        r.tick,
                        seq,
                        escape_ch_string(ev.tx_hash.as_deref().unwrap_or("")),
                        ev.kind,
                        escape_ch_string(&data),
                    )
                })
            })
            .collect();
        if values.is_empty() {
            return None;
        }
        Some(format!(
            "INSERT INTO tick_events (tick, seq, tx_hash, kind, data) VALUES {}",
            values.join(","),
        ))
    }
}

impl TickSink for ClickHouseStore {
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + '_>> {
        Box::pin(async {
            for sql in [
                SQL_CREATE_TICKS,
                SQL_CREATE_TRANSACTIONS,
                SQL_CREATE_EVENTS,
                SQL_CREATE_CHECKPOINT,
            ] {
                self.exec(sql).await?;
            }
            tracing::info!(url = %self.base_url, database = %self.database, "clickhouse ready");
            Ok(())
        })
    }

    fn insert_batch(
        &self,
        records: &[TickRecord],
    ) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + '_>> {
        let records = records.to_vec();
        Box::pin(async move {
            if records.is_empty() {
                return Ok(());
            }

            // One INSERT per table. The checkpoint only advances after
            // all three succeed, so a crash in between replays the whole
            // batch and the ReplacingMergeTree keys repair any partial
            // visibility.
            self.exec(&Self::ticks_insert(&records)).await?;
            if let Some(sql) = Self::transactions_insert(&records) {
                self.exec(&sql).await?;
            }
            if let Some(sql) = Self::events_insert(&records) {
                self.exec(&sql).await?;
            }
            Ok(())
        })
    }
}

impl CheckpointStore for ClickHouseStore {
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Option<u64>, IngestError>> + Send + '_>> {
        Box::pin(async {
            let sql = format!(
                "SELECT tick FROM ingest_checkpoint FINAL WHERE id = '{CHECKPOINT_ID}' FORMAT JSONEachRow"
            );
            let body = self.exec(&sql).await?;

            let Some(line) = body.lines().find(|l| !l.is_empty()) else {
                return Ok(None);
            };
            let row: CheckpointRow = serde_json::from_str(line)
                .map_err(|e| IngestError::storage(format!("parse checkpoint row: {e}")))?;
            Ok(Some(row.tick))
        })
    }

    fn store(
        &self,
        tick: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + '_>> {
        Box::pin(async move {
            let sql = format!(
                "INSERT INTO ingest_checkpoint (id, tick, updated_ms) VALUES ('{CHECKPOINT_ID}', {tick}, {})",
                now_ms(),
            );
            self.exec(&sql).await?;
            Ok(())
        })
    }
}

#[derive(serde::Deserialize)]
struct CheckpointRow {
    tick: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickd_api::{TickEvent, Transaction};

    fn record_with_payloads() -> TickRecord {
        TickRecord {
            tick: 7,
            epoch: 1,
            ts_ms: 1_000,
            transactions: vec![Transaction {
                hash: "a'b".into(),
                source: "SRC".into(),
                dest: "DST".into(),
                amount: 42,
                input_type: 0,
                payload: vec![1, 2, 3],
            }],
            events: vec![TickEvent {
                tx_hash: None,
                kind: 5,
                data: serde_json::json!({"note": "it's fine"}),
            }],
            is_catch_up: false,
        }
    }

    #[test]
    fn escaping_quotes_and_backslashes() {
        assert_eq!(escape_ch_string(r"a'b"), r"a\'b");
        assert_eq!(escape_ch_string(r"a\b"), r"a\\b");
    }

    #[test]
    fn insert_statements_cover_all_tables() {
        let records = vec![record_with_payloads()];

        let ticks = ClickHouseStore::ticks_insert(&records);
        assert!(ticks.starts_with("INSERT INTO ticks"));
        assert!(ticks.contains("(7, 1, 1000, 1, 1)"));

        let txs = ClickHouseStore::transactions_insert(&records).unwrap();
        assert!(txs.contains(r"a\'b"));
        assert!(txs.contains("'AQID'"));

        let events = ClickHouseStore::events_insert(&records).unwrap();
        assert!(events.contains(r"it\'s fine"));
    }

    #[test]
    fn empty_sections_produce_no_statement() {
        let records = vec![TickRecord {
            transactions: Vec::new(),
            events: Vec::new(),
            ..record_with_payloads()
        }];
        assert!(ClickHouseStore::transactions_insert(&records).is_none());
        assert!(ClickHouseStore::events_insert(&records).is_none());
    }
}
