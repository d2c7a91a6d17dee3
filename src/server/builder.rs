//! ServerBuilder for fluent API to build HTTP servers

use super::exposure::RestExposure;
use crate::config::ApiConfig;
use crate::core::service::Storage;
use crate::interface::Api;
use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Builder for creating HTTP servers over an [`Api`]
///
/// # Example
///
/// ```ignore
/// let app = ServerBuilder::new()
///     .with_config(ApiConfig::from_yaml_file("api.yaml")?, Arc::new(InMemoryStorage::new()))?
///     .build()?;
/// ```
#[derive(Default)]
pub struct ServerBuilder {
    api: Option<Arc<Api>>,
    custom_routes: Vec<Router>,
}

impl ServerBuilder {
    /// Create a new ServerBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose an already built API
    pub fn with_api(mut self, api: Arc<Api>) -> Self {
        self.api = Some(api);
        self
    }

    /// Build the API from configuration over `storage`
    pub fn with_config(mut self, config: ApiConfig, storage: Arc<dyn Storage>) -> Result<Self> {
        self.api = Some(config.build(storage)?);
        Ok(self)
    }

    /// Add custom routes to the server
    ///
    /// Typically authentication endpoints, or the middleware installing the
    /// request [`Identity`](super::Identity).
    pub fn with_custom_routes(mut self, routes: Router) -> Self {
        self.custom_routes.push(routes);
        self
    }

    /// Build the final REST router
    pub fn build(self) -> Result<Router> {
        let api = self
            .api
            .ok_or_else(|| anyhow::anyhow!("An API is required. Call .with_api() or .with_config()"))?;
        Ok(RestExposure::build_router(api, self.custom_routes))
    }

    /// Serve the application with graceful shutdown
    pub async fn serve(self, addr: &str) -> Result<()> {
        let app = self.build()?;
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}
