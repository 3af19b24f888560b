use super::{create_router, AppState};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// A running control surface, owned by one node instance
pub struct HttpServer {
    local_addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl HttpServer {
    pub async fn spawn(addr: &str, state: AppState) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind HTTP server to {}", addr))?;
        let local_addr = listener.local_addr()?;
        info!("HTTP control surface listening on {}", local_addr);

        let app = create_router(state);
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("HTTP server stopped: {}", e);
            }
        });

        Ok(Self { local_addr, handle })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop serving and wait until the listener is released
    pub async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}
