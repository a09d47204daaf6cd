pub(crate) mod header_filter;
pub(crate) mod proxy_bridge;
pub(crate) mod proxy_response;
pub(crate) mod retrieval_runtime;
pub(crate) mod server;
