//! Liveness endpoint for the controller process.

use axum::{routing::get, Router};
use tokio::sync::watch;
use tracing::info;

pub async fn serve(port: u16, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let app = Router::new().route("/healthz", get(|| async { "ok" }));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "health endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}
