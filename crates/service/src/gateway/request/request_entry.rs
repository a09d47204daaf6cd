use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Response, StatusCode};
use retriever_core::storage::now_iso;

use super::background::BackgroundTasks;
use super::egress::{measure_streamed_egress, split_body};
use super::request_log::{PerformanceStats, RetrievalLogEntry, TelemetrySink};
use super::request_parse::{parse_request, InboundRequest};
use super::runtime_config::RetrieverConfig;
use super::selection::{race_set, select_backend_index};
use super::upstream::race::RetrievalRacer;
use super::upstream::transport::BlobTransport;
use super::RetrievalError;
use crate::http::proxy_response::{blob_response, error_response};

// Fields of the log entry that are known once the race is won.
struct PendingLog {
    timestamp: String,
    backend_url: String,
    requester_identity: String,
    response_status: u16,
    cache_miss: Option<bool>,
    origin_country_code: Option<String>,
}

impl PendingLog {
    fn complete(self, egress_bytes: u64, stats: PerformanceStats) -> RetrievalLogEntry {
        RetrievalLogEntry {
            timestamp: self.timestamp,
            backend_url: self.backend_url,
            requester_identity: self.requester_identity,
            response_status: self.response_status,
            egress_bytes: Some(egress_bytes),
            cache_miss: self.cache_miss,
            stats: Some(stats),
            origin_country_code: self.origin_country_code,
        }
    }
}

fn has_no_body(status: StatusCode, headers: &HeaderMap) -> bool {
    if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
        return true;
    }
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        == Some(0)
}

/// Serves one blob request end to end: validate, pick backends, race them,
/// stream the winner back and record telemetry in the background.
pub struct RetrievalOrchestrator<T, S> {
    config: RetrieverConfig,
    racer: RetrievalRacer<T>,
    sink: Arc<S>,
    background: BackgroundTasks,
}

impl<T: BlobTransport, S: TelemetrySink> RetrievalOrchestrator<T, S> {
    pub fn new(
        config: RetrieverConfig,
        transport: Arc<T>,
        sink: Arc<S>,
        background: BackgroundTasks,
    ) -> Self {
        let racer = RetrievalRacer::new(
            transport,
            config.attempt_timeout,
            config.cache_status_header.clone(),
        );
        Self {
            config,
            racer,
            sink,
            background,
        }
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    pub fn background(&self) -> &BackgroundTasks {
        &self.background
    }

    pub async fn handle(&self, request: InboundRequest) -> Response<Body> {
        let handler_started_at = Instant::now();
        let timestamp = now_iso();
        match self.respond(request, handler_started_at, timestamp).await {
            Ok(response) => response,
            Err(err) => {
                let status = err.status_code();
                if matches!(err, RetrievalError::AllCandidatesFailed { .. }) {
                    // 中文注释：全部候选失败时不写 retrieval_logs，只打日志。
                    log::warn!("event=retrieval_failed status={} err={}", status.as_u16(), err);
                } else {
                    log::debug!("event=request_rejected status={} err={}", status.as_u16(), err);
                }
                error_response(&err)
            }
        }
    }

    async fn respond(
        &self,
        request: InboundRequest,
        handler_started_at: Instant,
        timestamp: String,
    ) -> Result<Response<Body>, RetrievalError> {
        if request.method != Method::GET {
            return Err(RetrievalError::UnsupportedMethod);
        }
        let parsed = parse_request(request.host.as_deref(), &request.path, &self.config.dns_root)?;

        let fetch_started_at = Instant::now();
        let seed = parsed.seed()?;
        let start = select_backend_index(Some(&seed), self.config.backends.len())?;
        let candidates = race_set(&self.config.backends, start, self.config.race_width);
        let outcome = self
            .racer
            .retrieve(&candidates, &parsed.content_id, self.config.cache_ttl_secs)
            .await?;

        let pending = PendingLog {
            timestamp,
            backend_url: outcome.backend.clone(),
            requester_identity: parsed.requester_identity,
            response_status: outcome.status.as_u16(),
            cache_miss: outcome.cache_miss,
            origin_country_code: request.origin_country_code,
        };

        if has_no_body(outcome.status, &outcome.headers) {
            let first_byte_at = Instant::now();
            let stats = PerformanceStats::from_instants(
                handler_started_at,
                fetch_started_at,
                first_byte_at,
                first_byte_at,
            );
            let sink = Arc::clone(&self.sink);
            let entry = pending.complete(0, stats);
            self.background.spawn(async move {
                record_entry(sink.as_ref(), entry).await;
            });
            return Ok(blob_response(outcome.status, &outcome.headers, Body::empty()));
        }

        let (client, meter) = split_body(outcome.body, &self.background);
        let first_byte_at = Instant::now();
        let sink = Arc::clone(&self.sink);
        self.background.spawn(async move {
            let egress_bytes = measure_streamed_egress(meter).await;
            let stats = PerformanceStats::from_instants(
                handler_started_at,
                fetch_started_at,
                first_byte_at,
                Instant::now(),
            );
            record_entry(sink.as_ref(), pending.complete(egress_bytes, stats)).await;
        });
        Ok(blob_response(
            outcome.status,
            &outcome.headers,
            Body::from_stream(client),
        ))
    }
}

async fn record_entry<S: TelemetrySink>(sink: &S, entry: RetrievalLogEntry) {
    let backend_url = entry.backend_url.clone();
    if let Err(err) = sink.record(entry).await {
        log::warn!(
            "event=retrieval_log_write_failed backend={} err={}",
            backend_url,
            err
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::request_log::SqliteTelemetrySink;
    use crate::gateway::upstream::mock_transport::{MockRoute, MockTransport};
    use crate::gateway::TelemetryError;
    use axum::body::to_bytes;
    use retriever_core::address::base36_encode;
    use retriever_core::storage::{StoredRetrievalLog, Storage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const BLOB_ID: &str = "lTg8X_Jf3zvWDAxutgcINWCoPBHo9fT6hXw3MoN-3cc";

    fn identity_host() -> String {
        format!("{}.walcdn.io", base36_encode(&[0x12; 32]))
    }

    fn get(path: &str) -> InboundRequest {
        InboundRequest {
            method: Method::GET,
            host: Some(identity_host()),
            path: path.to_string(),
            origin_country_code: Some("DE".to_string()),
        }
    }

    struct Harness {
        orchestrator: RetrievalOrchestrator<MockTransport, SqliteTelemetrySink>,
        transport: Arc<MockTransport>,
        storage: Arc<Mutex<Storage>>,
    }

    impl Harness {
        fn new(backends: &[&str], transport: MockTransport) -> Self {
            let storage = Storage::open_in_memory().expect("open storage");
            storage.init().expect("init storage");
            let storage = Arc::new(Mutex::new(storage));
            let transport = Arc::new(transport);
            let config = RetrieverConfig::new(backends.iter().map(|b| b.to_string()).collect());
            let orchestrator = RetrievalOrchestrator::new(
                config,
                Arc::clone(&transport),
                Arc::new(SqliteTelemetrySink::new(Arc::clone(&storage))),
                BackgroundTasks::new(),
            );
            Self {
                orchestrator,
                transport,
                storage,
            }
        }

        async fn logs(&self) -> Vec<StoredRetrievalLog> {
            self.orchestrator.background().wait_idle().await;
            self.storage
                .lock()
                .expect("lock")
                .list_retrieval_logs(100)
                .expect("list logs")
        }
    }

    async fn body_text(response: Response<Body>) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    #[tokio::test]
    async fn streams_body_and_records_egress() {
        let harness = Harness::new(
            &["https://agg.example"],
            MockTransport::new().route(
                "https://agg.example",
                MockRoute::ok(b"")
                    .chunks(vec![b"file ", b"content"])
                    .header("content-type", "application/octet-stream")
                    .header("cf-cache-status", "MISS"),
            ),
        );
        let response = harness.orchestrator.handle(get(&format!("/{BLOB_ID}"))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("content-type")
                .and_then(|value| value.to_str().ok()),
            Some("application/octet-stream")
        );
        let body = body_text(response).await;
        assert_eq!(body, "file content");

        let logs = harness.logs().await;
        assert_eq!(logs.len(), 1);
        let log = &logs[0].log;
        assert_eq!(log.response_status, 200);
        assert_eq!(log.egress_bytes, Some(body.len() as i64));
        assert_eq!(log.backend_url, "https://agg.example");
        assert_eq!(log.requester_identity, format!("0x{}", "12".repeat(32)));
        assert_eq!(log.cache_miss, Some(true));
        assert_eq!(log.origin_country_code.as_deref(), Some("DE"));
        let (ttfb, ttlb) = (
            log.fetch_ttfb.expect("ttfb"),
            log.fetch_ttlb.expect("ttlb"),
        );
        assert!(ttfb >= 0.0 && ttfb <= ttlb);
        assert!(log.handler_ttfb.expect("handler ttfb") >= 0.0);
    }

    #[tokio::test]
    async fn seed_picks_backend_by_modulus() {
        // "BQ" decodes to the single byte 5
        let harness = Harness::new(
            &["https://A", "https://B"],
            MockTransport::new()
                .route("https://A", MockRoute::ok(b"a"))
                .route("https://B", MockRoute::ok(b"b").header("cf-cache-status", "HIT")),
        );
        let response = harness.orchestrator.handle(get("/BQ")).await;
        assert_eq!(body_text(response).await, "b");
        assert_eq!(harness.transport.calls(), vec!["https://B/v1/blobs/BQ".to_string()]);
        let logs = harness.logs().await;
        assert_eq!(logs[0].log.backend_url, "https://B");
        assert_eq!(logs[0].log.cache_miss, Some(false));
    }

    #[tokio::test]
    async fn non_get_is_rejected_before_selection() {
        let harness = Harness::new(
            &["https://agg.example"],
            MockTransport::new().route("https://agg.example", MockRoute::ok(b"x")),
        );
        let mut request = get(&format!("/{BLOB_ID}"));
        request.method = Method::POST;
        let response = harness.orchestrator.handle(request).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body_text(response).await, "Method Not Allowed");
        assert!(harness.transport.calls().is_empty());
        assert!(harness.logs().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_requests_are_bad_requests() {
        let harness = Harness::new(&["https://agg.example"], MockTransport::new());

        let mut wrong_root = get("/abc");
        wrong_root.host = Some("foo.example.com".to_string());
        let response = harness.orchestrator.handle(wrong_root).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_text(response).await,
            "Invalid hostname: foo.example.com. It must end with .walcdn.io."
        );

        let response = harness.orchestrator.handle(get("/")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let mut bad_identity = get(&format!("/{BLOB_ID}"));
        bad_identity.host = Some("bar.walcdn.io".to_string());
        let response = harness.orchestrator.handle(bad_identity).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = harness.orchestrator.handle(get("/not*base64")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(harness.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn no_content_records_zero_egress() {
        let harness = Harness::new(
            &["https://agg.example"],
            MockTransport::new().route(
                "https://agg.example",
                MockRoute::status(StatusCode::NO_CONTENT),
            ),
        );
        let response = harness.orchestrator.handle(get(&format!("/{BLOB_ID}"))).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(body_text(response).await, "");
        let logs = harness.logs().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].log.egress_bytes, Some(0));
        assert_eq!(logs[0].log.response_status, 204);
    }

    #[tokio::test]
    async fn total_failure_returns_bad_gateway_without_log() {
        let harness = Harness::new(
            &["https://agg.example"],
            MockTransport::new().route(
                "https://agg.example",
                MockRoute::status(StatusCode::NOT_FOUND),
            ),
        );
        let response = harness.orchestrator.handle(get(&format!("/{BLOB_ID}"))).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_text(response).await;
        assert_eq!(body, "Bad Gateway");
        assert!(!body.contains("agg.example"));
        assert!(harness.logs().await.is_empty());
    }

    struct FailingSink {
        attempts: AtomicUsize,
    }

    impl TelemetrySink for FailingSink {
        async fn record(&self, _entry: RetrievalLogEntry) -> Result<(), TelemetryError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(TelemetryError::Persist("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn telemetry_failure_never_reaches_client() {
        let sink = Arc::new(FailingSink {
            attempts: AtomicUsize::new(0),
        });
        let background = BackgroundTasks::new();
        let orchestrator = RetrievalOrchestrator::new(
            RetrieverConfig::new(vec!["https://agg.example".to_string()]),
            Arc::new(
                MockTransport::new().route(
                    "https://agg.example",
                    MockRoute::ok(b"payload").delayed(Duration::from_millis(5)),
                ),
            ),
            Arc::clone(&sink),
            background.clone(),
        );
        let response = orchestrator.handle(get(&format!("/{BLOB_ID}"))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "payload");
        background.wait_idle().await;
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn metering_completes_when_client_never_reads() {
        let harness = Harness::new(
            &["https://agg.example"],
            MockTransport::new().route(
                "https://agg.example",
                MockRoute::ok(b"").chunks(vec![b"abc", b"defg"]),
            ),
        );
        let response = harness.orchestrator.handle(get(&format!("/{BLOB_ID}"))).await;
        drop(response);
        let logs = harness.logs().await;
        assert_eq!(logs[0].log.egress_bytes, Some(7));
    }

    struct StuckSink;

    impl TelemetrySink for StuckSink {
        async fn record(&self, _entry: RetrievalLogEntry) -> Result<(), TelemetryError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn response_streams_while_telemetry_is_pending() {
        let background = BackgroundTasks::new();
        let orchestrator = RetrievalOrchestrator::new(
            RetrieverConfig::new(vec!["https://agg.example".to_string()]),
            Arc::new(
                MockTransport::new().route(
                    "https://agg.example",
                    MockRoute::ok(b"").chunks(vec![b"hel", b"lo"]),
                ),
            ),
            Arc::new(StuckSink),
            background.clone(),
        );
        let body = tokio::time::timeout(Duration::from_secs(1), async {
            let response = orchestrator.handle(get(&format!("/{BLOB_ID}"))).await;
            assert_eq!(response.status(), StatusCode::OK);
            body_text(response).await
        })
        .await
        .expect("client must not wait for telemetry");
        assert_eq!(body, "hello");
        assert_eq!(background.pending(), 1);
    }
}
