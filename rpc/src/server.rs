//! Axum-based HTTP server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tracing::info;

use provote_admission::{AdmissionEngine, AdmissionStore};

use crate::handlers::{self, RpcState};
use crate::RpcError;

pub const CAST_VOTE_PATH: &str = "/api/v1/votes/cast";

/// Build the router. `/metrics` is only mounted when `enable_metrics` is set.
pub fn router<S: AdmissionStore + 'static>(
    engine: Arc<AdmissionEngine<S>>,
    enable_metrics: bool,
) -> Router {
    let state = Arc::new(RpcState { engine });
    let mut app = Router::new()
        .route(CAST_VOTE_PATH, post(handlers::cast_vote::<S>))
        .route("/healthz", get(handlers::healthz));
    if enable_metrics {
        app = app.route("/metrics", get(handlers::metrics::<S>));
    }
    app.with_state(state)
}

pub struct RpcServer<S> {
    pub listen_addr: String,
    pub enable_metrics: bool,
    engine: Arc<AdmissionEngine<S>>,
}

impl<S: AdmissionStore + 'static> RpcServer<S> {
    pub fn new(
        listen_addr: impl Into<String>,
        engine: Arc<AdmissionEngine<S>>,
        enable_metrics: bool,
    ) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            enable_metrics,
            engine,
        }
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn serve<F>(&self, shutdown: F) -> Result<(), RpcError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = router(self.engine.clone(), self.enable_metrics);
        let listener = tokio::net::TcpListener::bind(&self.listen_addr)
            .await
            .map_err(|e| RpcError::Server(format!("bind {}: {e}", self.listen_addr)))?;
        info!(addr = %self.listen_addr, "HTTP server listening");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| RpcError::Server(e.to_string()))?;
        info!("HTTP server stopped");
        Ok(())
    }
}
