use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::http::connection::Connection;
use crate::proxy::Dispatcher;

/// Bind the configured address and serve until the process is stopped
pub async fn run(cfg: &Config) -> anyhow::Result<()> {
    let dispatcher = Arc::new(Dispatcher::from_config(cfg)?);

    let listener = TcpListener::bind(&cfg.server.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.server.listen_addr))?;
    info!(
        address = %cfg.server.listen_addr,
        routes = dispatcher.routes().len(),
        "Listening"
    );

    serve(listener, dispatcher, cfg.server.max_request_bytes).await
}

/// Accept connections on an already bound listener.
///
/// Each connection runs in its own task; connections share only the
/// read-only dispatcher.
pub async fn serve(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    max_request_bytes: usize,
) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        tracing::debug!(peer = %peer, "Accepted connection");

        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            let mut conn = Connection::new(socket, dispatcher, max_request_bytes);
            if let Err(e) = conn.run().await {
                tracing::error!(peer = %peer, error = %e, "Connection error");
            }
        });
    }
}
