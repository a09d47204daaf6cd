use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use tokio::task::AbortHandle;

use super::super::{AttemptError, FailedAttempt, RetrievalError};
use super::transport::{
    blob_url, observe_cache_miss, BackendResponse, BlobTransport, BodyStream, CacheDirectives,
};

/// The first successful backend response of a race.
pub struct RetrievalOutcome {
    pub backend: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
    /// Whether the cache in front of the winning backend missed. `None` when
    /// cache observation is disabled.
    pub cache_miss: Option<bool>,
}

impl RetrievalOutcome {
    pub fn served_by(&self, backend: &str) -> bool {
        self.backend.eq_ignore_ascii_case(backend)
    }
}

impl std::fmt::Debug for RetrievalOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalOutcome")
            .field("backend", &self.backend)
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("cache_miss", &self.cache_miss)
            .finish_non_exhaustive()
    }
}

// Aborts every attempt still registered when the race ends or is dropped.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

pub struct RetrievalRacer<T> {
    transport: Arc<T>,
    attempt_timeout: Option<Duration>,
    cache_status_header: String,
}

impl<T> Clone for RetrievalRacer<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            attempt_timeout: self.attempt_timeout,
            cache_status_header: self.cache_status_header.clone(),
        }
    }
}

impl<T: BlobTransport> RetrievalRacer<T> {
    /// `cache_status_header` names the response header reporting `HIT` when the
    /// cache layer served the blob; an empty name disables the observation.
    pub fn new(
        transport: Arc<T>,
        attempt_timeout: Option<Duration>,
        cache_status_header: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            attempt_timeout,
            cache_status_header: cache_status_header.into(),
        }
    }

    /// Fetches `content_id` from every candidate at once and returns the first
    /// 2xx response. Remaining attempts are aborted as soon as a winner exists.
    pub async fn retrieve(
        &self,
        candidates: &[String],
        content_id: &str,
        cache_ttl_secs: u64,
    ) -> Result<RetrievalOutcome, RetrievalError> {
        if candidates.is_empty() {
            return Err(RetrievalError::NoCandidates);
        }
        let cache = CacheDirectives::new(cache_ttl_secs);
        let mut abort_guard = AbortOnDrop(Vec::with_capacity(candidates.len()));
        let mut attempts = FuturesUnordered::new();

        for backend in candidates {
            let transport = Arc::clone(&self.transport);
            let url = blob_url(backend, content_id);
            let attempt_timeout = self.attempt_timeout;
            let handle = tokio::spawn(async move {
                run_attempt(transport.as_ref(), &url, &cache, attempt_timeout).await
            });
            abort_guard.0.push(handle.abort_handle());
            let backend = backend.clone();
            attempts.push(async move { (backend, handle.await) });
        }

        let mut failures = Vec::with_capacity(candidates.len());
        while let Some((backend, joined)) = attempts.next().await {
            let result = joined.unwrap_or_else(|err| Err(AttemptError::Task(err.to_string())));
            match result {
                Ok(response) => {
                    drop(abort_guard);
                    log::debug!(
                        "event=race_won backend={} status={} failed_before={}",
                        backend,
                        response.status.as_u16(),
                        failures.len()
                    );
                    let cache_miss =
                        observe_cache_miss(&response.headers, &self.cache_status_header);
                    return Ok(RetrievalOutcome {
                        backend,
                        status: response.status,
                        headers: response.headers,
                        body: response.body,
                        cache_miss,
                    });
                }
                Err(error) => {
                    log::warn!(
                        "event=attempt_failed backend={} content_id={} err={}",
                        backend,
                        content_id,
                        error
                    );
                    failures.push(FailedAttempt { backend, error });
                }
            }
        }
        Err(RetrievalError::AllCandidatesFailed { attempts: failures })
    }
}

async fn run_attempt<T: BlobTransport>(
    transport: &T,
    url: &str,
    cache: &CacheDirectives,
    attempt_timeout: Option<Duration>,
) -> Result<BackendResponse, AttemptError> {
    let fetch = transport.fetch(url, cache);
    let response = match attempt_timeout {
        Some(limit) => tokio::time::timeout(limit, fetch)
            .await
            .map_err(|_| AttemptError::Timeout(limit))??,
        None => fetch.await?,
    };
    if !response.status.is_success() {
        return Err(AttemptError::Status {
            status: response.status,
        });
    }
    Ok(response)
}
