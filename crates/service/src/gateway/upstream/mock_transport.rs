use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;
use futures_util::StreamExt;

use super::super::AttemptError;
use super::transport::{BackendResponse, BlobTransport, BodyStream, CacheDirectives};

#[derive(Debug, Clone)]
pub(crate) struct MockRoute {
    status: StatusCode,
    delay: Duration,
    chunks: Vec<&'static [u8]>,
    headers: Vec<(&'static str, &'static str)>,
    transport_error: Option<&'static str>,
}

impl MockRoute {
    pub(crate) fn ok(body: &'static [u8]) -> Self {
        Self {
            status: StatusCode::OK,
            delay: Duration::ZERO,
            chunks: vec![body],
            headers: Vec::new(),
            transport_error: None,
        }
    }

    pub(crate) fn status(status: StatusCode) -> Self {
        Self {
            status,
            chunks: Vec::new(),
            ..Self::ok(b"")
        }
    }

    pub(crate) fn transport_error(message: &'static str) -> Self {
        Self {
            transport_error: Some(message),
            ..Self::ok(b"")
        }
    }

    pub(crate) fn chunks(mut self, chunks: Vec<&'static [u8]>) -> Self {
        self.chunks = chunks;
        self
    }

    pub(crate) fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.push((name, value));
        self
    }
}

// Counts attempts dropped before they produced a response.
struct CancelProbe {
    finished: bool,
    cancelled: Arc<AtomicUsize>,
}

impl Drop for CancelProbe {
    fn drop(&mut self) {
        if !self.finished {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub(crate) struct MockTransport {
    routes: HashMap<String, MockRoute>,
    calls: Mutex<Vec<String>>,
    cache: Mutex<Vec<CacheDirectives>>,
    pub(crate) cancelled: Arc<AtomicUsize>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self {
            routes: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            cache: Mutex::new(Vec::new()),
            cancelled: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn route(mut self, backend: &str, route: MockRoute) -> Self {
        self.routes.insert(backend.to_string(), route);
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub(crate) fn cache_directives(&self) -> Vec<CacheDirectives> {
        self.cache.lock().expect("cache lock").clone()
    }

    fn find_route(&self, url: &str) -> Option<MockRoute> {
        self.routes
            .iter()
            .find(|(backend, _)| url.starts_with(&format!("{backend}/")))
            .map(|(_, route)| route.clone())
    }
}

impl BlobTransport for MockTransport {
    async fn fetch(
        &self,
        url: &str,
        cache: &CacheDirectives,
    ) -> Result<BackendResponse, AttemptError> {
        self.calls.lock().expect("calls lock").push(url.to_string());
        self.cache.lock().expect("cache lock").push(*cache);
        let Some(route) = self.find_route(url) else {
            return Err(AttemptError::Transport(format!("no route for {url}")));
        };
        let mut probe = CancelProbe {
            finished: false,
            cancelled: Arc::clone(&self.cancelled),
        };
        if !route.delay.is_zero() {
            tokio::time::sleep(route.delay).await;
        }
        probe.finished = true;
        if let Some(message) = route.transport_error {
            return Err(AttemptError::Transport(message.to_string()));
        }
        let mut headers = HeaderMap::new();
        for (name, value) in route.headers {
            headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        let body: BodyStream = futures_util::stream::iter(
            route
                .chunks
                .into_iter()
                .map(|chunk| Ok::<Bytes, io::Error>(Bytes::from_static(chunk))),
        )
        .boxed();
        Ok(BackendResponse {
            status: route.status,
            headers,
            body,
        })
    }
}

pub(crate) async fn collect_body(mut body: BodyStream) -> Result<Vec<u8>, io::Error> {
    let mut out = Vec::new();
    while let Some(chunk) = body.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}
