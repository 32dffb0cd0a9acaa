//! HTTP listener setup.

use std::sync::Arc;

use depot_runtime::Daemon;
use tokio::net::TcpListener;

use crate::api;
use crate::state::AppState;

/// Depot HTTP server.
pub struct DepotServer {
    daemon: Arc<Daemon>,
}

impl DepotServer {
    pub fn new(daemon: Arc<Daemon>) -> Self {
        Self { daemon }
    }

    /// Serve the API on every configured listen address until Ctrl-C.
    pub async fn serve(&self) -> anyhow::Result<()> {
        let app = api::router(AppState::new(self.daemon.clone()));

        let mut tasks = Vec::new();
        for addr in &self.daemon.config().listen {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;
            tracing::info!(addr = %addr, "Depot API listening");

            let app = app.clone();
            tasks.push(tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown_signal())
                    .await
            }));
        }

        if tasks.is_empty() {
            anyhow::bail!("No listen addresses configured");
        }

        for result in futures::future::join_all(tasks).await {
            result??;
        }
        tracing::info!("Depot API stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
