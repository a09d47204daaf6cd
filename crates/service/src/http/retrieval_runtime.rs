use std::io;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request as HttpRequest, Response};
use axum::routing::any;
use axum::Router;
use retriever_core::storage::Storage;

use crate::gateway::{
    current_config, BackgroundTasks, BlobTransport, InboundRequest, ReqwestTransport,
    RetrievalOrchestrator, RetrieverConfig, SqliteTelemetrySink, TelemetrySink,
};
use crate::http::proxy_bridge::run_retrieval_server;

async fn retrieval_handler<T: BlobTransport, S: TelemetrySink>(
    State(orchestrator): State<Arc<RetrievalOrchestrator<T, S>>>,
    request: HttpRequest<Body>,
) -> Response<Body> {
    // request bodies are never read
    let (parts, _body) = request.into_parts();
    let inbound = InboundRequest::from_parts(&parts, &orchestrator.config().country_header);
    orchestrator.handle(inbound).await
}

/// Every path and method goes to the orchestrator, which rejects what it
/// does not serve.
pub fn retrieval_router<T: BlobTransport, S: TelemetrySink>(
    orchestrator: Arc<RetrievalOrchestrator<T, S>>,
) -> Router {
    Router::new()
        .fallback(any(retrieval_handler::<T, S>))
        .with_state(orchestrator)
}

/// Router backed by the reqwest transport and the SQLite telemetry sink.
///
/// Fails when `config` has no backends: a gateway without candidates can only
/// ever answer 500.
pub fn build_retrieval_app(
    config: RetrieverConfig,
    storage: Arc<Mutex<Storage>>,
    background: BackgroundTasks,
) -> io::Result<Router> {
    if config.backends.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "no valid backends configured (RETRIEVER_BACKENDS)",
        ));
    }
    log::info!(
        "event=retrieval_app_ready backends={} race_width={} dns_root={}",
        config.backends.join(","),
        config.race_width,
        config.dns_root
    );
    let orchestrator = RetrievalOrchestrator::new(
        config,
        Arc::new(ReqwestTransport::from_runtime_config()),
        Arc::new(SqliteTelemetrySink::new(storage)),
        background,
    );
    Ok(retrieval_router(Arc::new(orchestrator)))
}

pub(crate) fn run_retrieval_service(addr: &str, storage: Storage) -> io::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

    runtime.block_on(async move {
        let background = BackgroundTasks::new();
        let app = build_retrieval_app(
            current_config(),
            Arc::new(Mutex::new(storage)),
            background.clone(),
        )?;
        let result = run_retrieval_server(addr, app).await;
        // 中文注释：监听已关闭，但已返回的响应可能还有计量/落库任务在跑，必须等它们结束。
        log::info!("event=draining_background_tasks pending={}", background.pending());
        background.wait_idle().await;
        result
    })
}
