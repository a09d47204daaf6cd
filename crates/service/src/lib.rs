use std::sync::atomic::{AtomicBool, Ordering};

mod gateway;
mod http;
mod lock_utils;
pub mod process_env;
#[path = "storage/storage_helpers.rs"]
mod storage_helpers;

pub use gateway::{
    measure_streamed_egress, race_set, select_aggregator, select_backend_index, split_body,
    AttemptError, BackendResponse, BackgroundTasks, BlobTransport, BodyStream, CacheDirectives,
    EgressBranch, FailedAttempt, InboundRequest, PerformanceStats, ReqwestTransport,
    RetrievalError, RetrievalLogEntry, RetrievalOrchestrator, RetrievalOutcome, RetrievalRacer,
    RetrievalRequest, RetrieverConfig, SqliteTelemetrySink, TelemetryError, TelemetrySink,
};
pub use http::retrieval_runtime::{build_retrieval_app, retrieval_router};

pub const DEFAULT_ADDR: &str = "localhost:48770";

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

pub mod portable {
    // 中文注释：发行物使用“同目录可选 env 文件 + 默认 DB”机制，做到解压即用。
    pub fn bootstrap_current_process() {
        crate::process_env::load_env_from_exe_dir();
        crate::process_env::ensure_default_db_path();
    }
}

/// Settings currently loaded from the environment.
pub fn runtime_config() -> RetrieverConfig {
    gateway::current_config()
}

pub fn reload_runtime_config_from_env() {
    gateway::reload_runtime_config_from_env();
}

/// Blocks until shutdown is requested (flag or Ctrl-C) and every background
/// telemetry task has settled.
pub fn start_server(addr: &str) -> std::io::Result<()> {
    portable::bootstrap_current_process();
    gateway::reload_runtime_config_from_env();
    http::server::start_http(addr)
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

pub fn clear_shutdown_flag() {
    SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
}

pub fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}
