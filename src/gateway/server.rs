//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

use super::proxy::OaiProxy;
use super::router::{AppState, create_router};
use crate::config::Config;
use crate::{Error, Result};

/// OAI-PMH proxy server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Proxy core
    proxy: Arc<OaiProxy>,
}

impl Gateway {
    /// Create a new gateway
    pub fn new(config: Config) -> Result<Self> {
        let proxy = Arc::new(OaiProxy::from_config(&config)?);
        Ok(Self { config, proxy })
    }

    /// Run the gateway until a shutdown signal arrives
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let state = Arc::new(AppState {
            proxy: Arc::clone(&self.proxy),
            request_timeout: self.config.server.request_timeout,
        });
        let app = create_router(state);

        let listener = TcpListener::bind(addr).await?;

        info!("OAI-PMH PROXY v{}", env!("CARGO_PKG_VERSION"));
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(backend = %self.config.backend.url, base_url = %self.config.base_url, "Proxying");
        for (prefix, format) in &self.config.formats {
            if let Some(source) = format.pipeline.first() {
                info!(format = %prefix, source = %source, steps = format.pipeline.len() - 1, "Format served through pipeline");
            }
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Shut down");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
