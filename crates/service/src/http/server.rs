use crate::http::retrieval_runtime::run_retrieval_service;
use crate::storage_helpers::open_telemetry_storage;

pub fn start_http(addr: &str) -> std::io::Result<()> {
    let storage = open_telemetry_storage()?;
    run_retrieval_service(addr, storage)
}
