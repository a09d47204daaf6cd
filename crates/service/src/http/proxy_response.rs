use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, Response, StatusCode};

use crate::gateway::RetrievalError;
use crate::http::header_filter::should_skip_response_header;

pub(crate) fn text_response(status: StatusCode, body: impl Into<String>) -> Response<Body> {
    let mut response = Response::new(Body::from(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

/// Rejections echo their validation message. Server-side failures only expose
/// the status reason; backend URLs and transport errors stay in the logs.
pub(crate) fn error_response(err: &RetrievalError) -> Response<Body> {
    let status = err.status_code();
    if status.is_server_error() {
        let reason = status.canonical_reason().unwrap_or("Upstream Error");
        return text_response(status, reason);
    }
    text_response(status, err.to_string())
}

/// Mirrors the winning backend's status and end-to-end headers around `body`.
pub(crate) fn blob_response(status: StatusCode, headers: &HeaderMap, body: Body) -> Response<Body> {
    let mut builder = Response::builder().status(status);
    for (name, value) in headers.iter() {
        if should_skip_response_header(name) {
            continue;
        }
        builder = builder.header(name, value);
    }
    builder.body(body).unwrap_or_else(|err| {
        log::warn!("event=blob_response_build_failed status={} err={}", status.as_u16(), err);
        text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    })
}
