//! HTTP server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::handlers;
use crate::operations::Operations;

/// Header echoing the per-request correlation id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Operations facade
    pub ops: Arc<Operations>,
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/eks-create-job", post(handlers::create_job))
        .route("/api/eks-delete-job", delete(handlers::delete_job))
        .route("/api/eks-get-job-status", get(handlers::get_job_status))
        .route("/api/eks-create-namespace", post(handlers::create_namespace))
        .route("/api/eks-delete-namespace", delete(handlers::delete_namespace))
        .layer(middleware::from_fn(request_context))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Attach a short request id to every log line of a request
async fn request_context(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().simple().to_string()[..8].to_string();
    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    async move {
        info!("API request");
        let mut response = next.run(request).await;
        info!(status = response.status().as_u16(), "API response");
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
    .instrument(span)
    .await
}

/// Serve the API until SIGINT or SIGTERM
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Starting eksops API server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining requests");
}
