use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

/// Why a single backend attempt did not produce a servable response.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("upstream returned {status}")]
    Status { status: StatusCode },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("attempt timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("attempt task failed: {0}")]
    Task(String),
}

#[derive(Debug)]
pub struct FailedAttempt {
    pub backend: String,
    pub error: AttemptError,
}

fn summarize_attempts(attempts: &[FailedAttempt]) -> String {
    attempts
        .iter()
        .map(|attempt| format!("{} ({})", attempt.backend, attempt.error))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Method Not Allowed")]
    UnsupportedMethod,
    #[error("{0}")]
    MalformedRequest(String),
    #[error("Invalid address: {0}. Address must be a valid sui address.")]
    InvalidIdentityFormat(String),
    #[error("no backend candidates configured")]
    NoCandidates,
    #[error("all {} backend candidates failed: {}", .attempts.len(), summarize_attempts(.attempts))]
    AllCandidatesFailed { attempts: Vec<FailedAttempt> },
}

impl RetrievalError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedMethod => StatusCode::METHOD_NOT_ALLOWED,
            Self::MalformedRequest(_) | Self::InvalidIdentityFormat(_) => StatusCode::BAD_REQUEST,
            Self::NoCandidates => StatusCode::INTERNAL_SERVER_ERROR,
            Self::AllCandidatesFailed { attempts } => {
                let all_timed_out = !attempts.is_empty()
                    && attempts
                        .iter()
                        .all(|attempt| matches!(attempt.error, AttemptError::Timeout(_)));
                if all_timed_out {
                    StatusCode::GATEWAY_TIMEOUT
                } else {
                    StatusCode::BAD_GATEWAY
                }
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("insert retrieval log failed: {0}")]
    Persist(String),
    #[error("telemetry task failed: {0}")]
    Task(String),
}
