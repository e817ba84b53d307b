//! Admission webhook server
//!
//! Exposes priority admission over the Kubernetes dynamic admission
//! protocol. The API server calls `/mutate` for pods and `/validate` for
//! PriorityClasses; `/readyz` reports whether the PriorityClass index has
//! completed its first sync.

pub mod review;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tracing::info;

use crate::admission::PriorityAdmission;
use crate::priority::ReadinessProbe;
use crate::Error;

/// Shared state for webhook handlers
pub struct WebhookState {
    /// Mutating and validating passes
    pub admission: PriorityAdmission,
    /// Sync status of the PriorityClass index
    pub readiness: Arc<dyn ReadinessProbe>,
}

impl WebhookState {
    /// Create a new webhook state
    pub fn new(admission: PriorityAdmission, readiness: Arc<dyn ReadinessProbe>) -> Self {
        Self {
            admission,
            readiness,
        }
    }
}

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to bind the server
    pub addr: SocketAddr,
    /// Path to the TLS certificate PEM
    pub cert_path: PathBuf,
    /// Path to the TLS private key PEM
    pub key_path: PathBuf,
}

/// Create the webhook router
///
/// Routes:
/// - `POST /mutate` - Resolve pod priority
/// - `POST /validate` - Guard the global default PriorityClass
/// - `GET /healthz` - Liveness
/// - `GET /readyz` - PriorityClass index sync status
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate", post(review::mutate_handler))
        .route("/validate", post(review::validate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

async fn readyz_handler(State(state): State<Arc<WebhookState>>) -> (StatusCode, &'static str) {
    if state.readiness.has_synced() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "priorityclass index not synced")
    }
}

/// Serve the webhook over TLS until the server fails
pub async fn serve(config: ServerConfig, state: Arc<WebhookState>) -> Result<(), Error> {
    let tls_config = RustlsConfig::from_pem_file(&config.cert_path, &config.key_path)
        .await
        .map_err(|e| Error::config(format!("TLS config error: {}", e)))?;

    info!(addr = %config.addr, "Starting priority admission webhook");

    axum_server::bind_rustls(config.addr, tls_config)
        .serve(webhook_router(state).into_make_service())
        .await
        .map_err(|e| Error::server(e.to_string()))
}
