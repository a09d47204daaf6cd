mod upstream;
#[path = "core/error.rs"]
mod error;
#[path = "core/runtime_config.rs"]
mod runtime_config;
#[path = "request/request_parse.rs"]
mod request_parse;
#[path = "request/request_entry.rs"]
mod request_entry;
#[path = "routing/selection.rs"]
mod selection;
#[path = "observability/background.rs"]
mod background;
#[path = "observability/egress.rs"]
mod egress;
#[path = "observability/request_log.rs"]
mod request_log;

pub use background::BackgroundTasks;
pub use egress::{measure_streamed_egress, split_body, EgressBranch};
pub use error::{AttemptError, FailedAttempt, RetrievalError, TelemetryError};
pub use request_entry::RetrievalOrchestrator;
pub use request_log::{PerformanceStats, RetrievalLogEntry, SqliteTelemetrySink, TelemetrySink};
pub use request_parse::{InboundRequest, RetrievalRequest};
pub use runtime_config::RetrieverConfig;
pub use upstream::race::{RetrievalOutcome, RetrievalRacer};
pub use upstream::transport::{
    BackendResponse, BlobTransport, BodyStream, CacheDirectives, ReqwestTransport,
};

pub(crate) use runtime_config::current_config;
pub use selection::{race_set, select_aggregator, select_backend_index};

pub(crate) fn reload_runtime_config_from_env() {
    runtime_config::reload_from_env();
}
