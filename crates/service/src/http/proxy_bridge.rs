use std::io;
use std::time::Duration;

use axum::Router;

async fn wait_for_shutdown_signal() {
    let flag = async {
        while !crate::shutdown_requested() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    tokio::select! {
        _ = flag => log::info!("event=shutdown_requested source=flag"),
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => log::info!("event=shutdown_requested source=ctrl_c"),
            // without a signal handler only the flag can stop the server
            Err(err) => {
                log::warn!("event=ctrl_c_unavailable err={}", err);
                while !crate::shutdown_requested() {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        },
    }
}

async fn serve_on_listener(listener: tokio::net::TcpListener, app: Router) -> io::Result<()> {
    if let Ok(local) = listener.local_addr() {
        log::info!("event=listener_ready addr={}", local);
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
}

/// Serves `app` until shutdown is requested. In-flight responses finish before
/// this returns.
pub(crate) async fn run_retrieval_server(addr: &str, app: Router) -> io::Result<()> {
    // 中文注释：localhost 在部分系统上只解析到 IPv6；双栈监听可避免客户端栈选择差异导致的连接失败。
    if let Some(port) = addr.strip_prefix("localhost:") {
        let v4 = tokio::net::TcpListener::bind(format!("127.0.0.1:{port}")).await;
        let v6 = tokio::net::TcpListener::bind(format!("[::1]:{port}")).await;
        return match (v4, v6) {
            (Ok(v4_listener), Ok(v6_listener)) => {
                let v4_task = serve_on_listener(v4_listener, app.clone());
                let v6_task = serve_on_listener(v6_listener, app);
                let (v4_result, v6_result) = tokio::join!(v4_task, v6_task);
                v4_result.and(v6_result)
            }
            (Ok(listener), Err(_)) | (Err(_), Ok(listener)) => serve_on_listener(listener, app).await,
            (Err(err), Err(_)) => Err(err),
        };
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_on_listener(listener, app).await
}
