pub(crate) mod auth;
mod error;
mod handlers;
mod ratelimit;
mod router;

pub use error::{ApiError, ApiResult};
pub use ratelimit::IpRateLimiter;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::core::alerts::AlertEngine;
use crate::core::bus::EventBus;
use crate::core::lifecycle::LifecycleManager;
use crate::core::linear::LinearIngest;
use crate::core::store::Store;
use crate::core::system::ControlPlane;

/// Everything a handler can reach. Cloning is cheap; all members are shared.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub lifecycle: Arc<LifecycleManager>,
    pub alerts: Arc<AlertEngine>,
    pub bus: Arc<EventBus>,
    pub ingest: Arc<LinearIngest>,
    pub limiter: Arc<IpRateLimiter>,
    pub api_key: Arc<String>,
    pub log_tx: tokio::sync::broadcast::Sender<String>,
    pub allowed_origins: Arc<Vec<String>>,
}

/// Thin HTTP adapter over the control plane: routing, auth, rate limiting,
/// and the streaming endpoints. All behaviour lives in the core services.
pub struct ApiServer {
    plane: ControlPlane,
    log_tx: tokio::sync::broadcast::Sender<String>,
}

impl ApiServer {
    pub fn new(plane: ControlPlane, log_tx: tokio::sync::broadcast::Sender<String>) -> Self {
        Self { plane, log_tx }
    }

    pub fn app_state(&self) -> AppState {
        let config = &self.plane.config;
        AppState {
            store: self.plane.store.clone(),
            lifecycle: self.plane.lifecycle.clone(),
            alerts: self.plane.alerts.clone(),
            bus: self.plane.bus.clone(),
            ingest: self.plane.ingest.clone(),
            limiter: Arc::new(IpRateLimiter::new(
                config.rate_limit_window_ms,
                config.rate_limit_max_requests,
                self.plane.clock.clone(),
            )),
            api_key: Arc::new(config.api_key.clone()),
            log_tx: self.log_tx.clone(),
            allowed_origins: Arc::new(config.allowed_origins.clone()),
        }
    }

    /// Bind and serve until ctrl-c.
    pub async fn serve(&self) -> Result<()> {
        let addr = format!("{}:{}", self.plane.config.host, self.plane.config.port);
        let app = router::build_api_router(self.app_state());

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("API server listening at http://{addr}");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;
        Ok(())
    }
}
