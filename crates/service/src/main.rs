fn main() {
    let addr = std::env::var("RETRIEVER_SERVICE_ADDR")
        .unwrap_or_else(|_| retriever_service::DEFAULT_ADDR.to_string());
    println!("retriever-service listening on {addr}");
    if let Err(err) = retriever_service::start_server(&addr) {
        eprintln!("service stopped: {err}");
        std::process::exit(1);
    }
}
