use axum::http::request::Parts;
use axum::http::{header, Method};
use retriever_core::address::{base36_to_hex, is_valid_sui_address};
use retriever_core::blob::BlobSeed;

use super::RetrievalError;

/// Transport-independent view of an incoming HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
    pub method: Method,
    pub host: Option<String>,
    pub path: String,
    pub origin_country_code: Option<String>,
}

impl InboundRequest {
    pub fn from_parts(parts: &Parts, country_header: &str) -> Self {
        // 中文注释：HTTP/2 请求没有 Host 头，只能从 URI authority 取主机名。
        let host = parts
            .uri
            .authority()
            .map(|authority| authority.as_str().to_string())
            .or_else(|| {
                parts
                    .headers
                    .get(header::HOST)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string)
            });
        let origin_country_code = if country_header.is_empty() {
            None
        } else {
            parts
                .headers
                .get(country_header)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        Self {
            method: parts.method.clone(),
            host,
            path: parts.uri.path().to_string(),
            origin_country_code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalRequest {
    pub requester_identity: String,
    pub content_id: String,
}

impl RetrievalRequest {
    pub fn seed(&self) -> Result<BlobSeed, RetrievalError> {
        BlobSeed::from_blob_id(&self.content_id)
            .map_err(|err| RetrievalError::MalformedRequest(err.to_string()))
    }
}

fn strip_port(host: &str) -> &str {
    // bracketed IPv6 literals keep their colons
    if host.starts_with('[') {
        return host
            .split_once(']')
            .map(|(literal, _)| &host[..literal.len() + 1])
            .unwrap_or(host);
    }
    host.split_once(':').map(|(name, _)| name).unwrap_or(host)
}

/// Splits `{base36 identity}{dns_root}/{content id}` into its two fields and
/// validates the identity. Query strings never reach here (path only).
pub(crate) fn parse_request(
    host: Option<&str>,
    path: &str,
    dns_root: &str,
) -> Result<RetrievalRequest, RetrievalError> {
    let hostname = strip_port(host.unwrap_or("").trim()).to_ascii_lowercase();
    if !hostname.ends_with(dns_root) {
        return Err(RetrievalError::MalformedRequest(format!(
            "Invalid hostname: {hostname}. It must end with {dns_root}."
        )));
    }
    let identity_label = &hostname[..hostname.len() - dns_root.len()];

    let Some(content_id) = path.split('/').find(|segment| !segment.is_empty()) else {
        return Err(RetrievalError::MalformedRequest(
            "Missing required path element: `/{BlobID}`".to_string(),
        ));
    };

    if identity_label.is_empty() {
        return Err(RetrievalError::MalformedRequest(
            "Missing required fields".to_string(),
        ));
    }

    let requester_identity = base36_to_hex(identity_label)
        .map_err(|_| RetrievalError::InvalidIdentityFormat(identity_label.to_string()))?;
    if !is_valid_sui_address(&requester_identity) {
        return Err(RetrievalError::InvalidIdentityFormat(requester_identity));
    }

    Ok(RetrievalRequest {
        requester_identity,
        content_id: content_id.to_string(),
    })
}
