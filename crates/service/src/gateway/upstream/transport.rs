use std::future::Future;
use std::io;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use super::super::AttemptError;

pub(crate) const CACHE_TTL_BY_STATUS_HEADER: &str = "x-cache-ttl-by-status";
pub(crate) const CACHE_EVERYTHING_HEADER: &str = "x-cache-everything";

pub type BodyStream = BoxStream<'static, Result<Bytes, io::Error>>;

/// Status, headers and unread body of one backend response.
pub struct BackendResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl std::fmt::Debug for BackendResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Caching instructions for the cache layer sitting in front of the backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheDirectives {
    pub success_ttl_secs: u64,
}

impl CacheDirectives {
    pub fn new(success_ttl_secs: u64) -> Self {
        Self { success_ttl_secs }
    }

    pub fn ttl_by_status(&self) -> String {
        format!(
            "200-299={}, 404=0, 500-599=0",
            self.success_ttl_secs
        )
    }

    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.ttl_by_status()) {
            headers.insert(CACHE_TTL_BY_STATUS_HEADER, value);
        }
        headers.insert(CACHE_EVERYTHING_HEADER, HeaderValue::from_static("true"));
        headers
    }
}

/// One GET against one backend. Implementations must not interpret the status;
/// the racer decides what counts as a success.
pub trait BlobTransport: Send + Sync + 'static {
    fn fetch(
        &self,
        url: &str,
        cache: &CacheDirectives,
    ) -> impl Future<Output = Result<BackendResponse, AttemptError>> + Send;
}

pub(crate) fn blob_url(backend: &str, content_id: &str) -> String {
    format!(
        "{}/v1/blobs/{}",
        backend.trim_end_matches('/'),
        urlencoding::encode(content_id)
    )
}

/// `None` when observation is disabled (empty header name); otherwise anything
/// other than `HIT`, including a missing header, is a miss.
pub(crate) fn observe_cache_miss(headers: &HeaderMap, cache_status_header: &str) -> Option<bool> {
    if cache_status_header.is_empty() {
        return None;
    }
    let status = headers
        .get(cache_status_header)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or("");
    Some(!status.eq_ignore_ascii_case("HIT"))
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Client configured from the runtime settings: connect and read timeouts,
    /// pooled keep-alive connections and the optional cache proxy.
    pub fn from_runtime_config() -> Self {
        Self::new(build_upstream_client(
            super::super::runtime_config::upstream_connect_timeout(),
            super::super::runtime_config::upstream_read_timeout(),
            super::super::runtime_config::cache_proxy().as_deref(),
        ))
    }
}

pub(crate) fn build_upstream_client(
    connect_timeout: Duration,
    read_timeout: Option<Duration>,
    cache_proxy: Option<&str>,
) -> reqwest::Client {
    // 中文注释：不设总超时，大 blob 的流式下载时间不可预估；只限制两次读取之间的空闲时间，
    // 否则卡住的 body 会让计量任务永远挂起，关停时 wait_idle 无法返回。
    let mut builder = reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .pool_max_idle_per_host(32)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_keepalive(Some(Duration::from_secs(30)));
    if let Some(read_timeout) = read_timeout {
        builder = builder.read_timeout(read_timeout);
    }
    if let Some(proxy_url) = cache_proxy {
        match reqwest::Proxy::all(proxy_url) {
            Ok(proxy) => builder = builder.proxy(proxy),
            Err(err) => log::warn!(
                "event=cache_proxy_rejected proxy={} err={}",
                proxy_url,
                err
            ),
        }
    }
    builder.build().unwrap_or_else(|err| {
        log::warn!("event=upstream_client_build_failed err={}", err);
        reqwest::Client::new()
    })
}

impl BlobTransport for ReqwestTransport {
    async fn fetch(
        &self,
        url: &str,
        cache: &CacheDirectives,
    ) -> Result<BackendResponse, AttemptError> {
        let response = self
            .client
            .get(url)
            .headers(cache.headers())
            .send()
            .await
            .map_err(|err| AttemptError::Transport(err.to_string()))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err)))
            .boxed();
        Ok(BackendResponse {
            status,
            headers,
            body,
        })
    }
}
