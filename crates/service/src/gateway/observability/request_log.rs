use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use retriever_core::storage::{RetrievalLog, Storage};

use super::TelemetryError;
use crate::lock_utils::lock_recover;

/// Timings of one retrieval in milliseconds, measured on a monotonic clock.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PerformanceStats {
    pub fetch_ttfb_ms: f64,
    pub fetch_ttlb_ms: f64,
    pub handler_ttfb_ms: f64,
}

fn millis_between(start: Instant, end: Instant) -> f64 {
    end.saturating_duration_since(start).as_secs_f64() * 1000.0
}

impl PerformanceStats {
    pub fn from_instants(
        handler_started_at: Instant,
        fetch_started_at: Instant,
        first_byte_at: Instant,
        last_byte_at: Instant,
    ) -> Self {
        let fetch_ttfb_ms = millis_between(fetch_started_at, first_byte_at);
        Self {
            fetch_ttfb_ms,
            fetch_ttlb_ms: millis_between(fetch_started_at, last_byte_at).max(fetch_ttfb_ms),
            handler_ttfb_ms: millis_between(handler_started_at, first_byte_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalLogEntry {
    /// Request arrival, ISO-8601 UTC.
    pub timestamp: String,
    pub backend_url: String,
    pub requester_identity: String,
    pub response_status: u16,
    pub egress_bytes: Option<u64>,
    pub cache_miss: Option<bool>,
    pub stats: Option<PerformanceStats>,
    pub origin_country_code: Option<String>,
}

fn non_negative(value: f64) -> f64 {
    // NaN also lands on 0
    value.max(0.0)
}

impl RetrievalLogEntry {
    pub fn into_record(self) -> RetrievalLog {
        RetrievalLog {
            timestamp: self.timestamp,
            backend_url: self.backend_url,
            requester_identity: self.requester_identity,
            response_status: i64::from(self.response_status),
            egress_bytes: self
                .egress_bytes
                .map(|bytes| i64::try_from(bytes).unwrap_or(i64::MAX)),
            cache_miss: self.cache_miss,
            fetch_ttfb: self.stats.map(|stats| non_negative(stats.fetch_ttfb_ms)),
            fetch_ttlb: self.stats.map(|stats| non_negative(stats.fetch_ttlb_ms)),
            handler_ttfb: self.stats.map(|stats| non_negative(stats.handler_ttfb_ms)),
            origin_country_code: self.origin_country_code,
        }
    }
}

/// Append-only destination for retrieval log entries.
pub trait TelemetrySink: Send + Sync + 'static {
    fn record(
        &self,
        entry: RetrievalLogEntry,
    ) -> impl Future<Output = Result<(), TelemetryError>> + Send;
}

#[derive(Clone)]
pub struct SqliteTelemetrySink {
    storage: Arc<Mutex<Storage>>,
}

impl SqliteTelemetrySink {
    pub fn new(storage: Arc<Mutex<Storage>>) -> Self {
        Self { storage }
    }
}

impl TelemetrySink for SqliteTelemetrySink {
    async fn record(&self, entry: RetrievalLogEntry) -> Result<(), TelemetryError> {
        let record = entry.into_record();
        match serde_json::to_string(&record) {
            Ok(line) => log::info!("event=retrieval_log {}", line),
            Err(err) => log::warn!("event=retrieval_log_encode_failed err={}", err),
        }
        let storage = Arc::clone(&self.storage);
        // 中文注释：rusqlite 是同步 IO，放到阻塞线程池里执行，避免占住 tokio worker。
        tokio::task::spawn_blocking(move || {
            let storage = lock_recover(&storage, "telemetry_storage");
            storage
                .insert_retrieval_log(&record)
                .map(|_| ())
                .map_err(|err| TelemetryError::Persist(err.to_string()))
        })
        .await
        .map_err(|err| TelemetryError::Task(err.to_string()))?
    }
}
