//! Mutating Admission Webhook for sidecar injection
//!
//! The API server sends every pod CREATE (and whatever else the webhook
//! configuration selects) to `POST /inject`. The handler decodes the
//! AdmissionReview, hands the request to [`SidecarInjector`] and encodes the
//! outcome back into an AdmissionReview.
//!
//! The webhook itself is served over TLS; `/healthz` is additionally exposed on
//! a plain HTTP port for kubelet probes.

pub mod pod;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tracing::{error, info};

use crate::injector::SidecarInjector;
use crate::{Error, Result};

/// Shared state for webhook handlers
#[derive(Clone, Debug)]
pub struct WebhookState {
    /// Injection engine holding the read-only sidecar defaults
    pub injector: SidecarInjector,
}

impl WebhookState {
    /// Create a new webhook state around the given injector
    pub fn new(injector: SidecarInjector) -> Self {
        Self { injector }
    }
}

/// Create the webhook router
///
/// - POST /inject - Mutate pods that opted in to the sidecar
/// - GET /healthz - Liveness
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/inject", post(pod::mutate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Router for the plain HTTP health port
pub fn health_router() -> Router {
    Router::new().route("/healthz", get(|| async { "ok" }))
}

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address for the TLS webhook listener
    pub addr: SocketAddr,
    /// Address for the plain HTTP health listener
    pub health_addr: SocketAddr,
    /// TLS certificate chain (PEM)
    pub cert_path: PathBuf,
    /// TLS private key (PEM)
    pub key_path: PathBuf,
}

/// Start the health listener and serve the webhook until the server stops
pub async fn start_server(config: ServerConfig, state: Arc<WebhookState>) -> Result<()> {
    let tls_config = RustlsConfig::from_pem_file(&config.cert_path, &config.key_path)
        .await
        .map_err(|e| {
            Error::config(format!(
                "TLS config error ({}, {}): {e}",
                config.cert_path.display(),
                config.key_path.display()
            ))
        })?;

    let health_listener = tokio::net::TcpListener::bind(config.health_addr).await?;
    info!(addr = %config.health_addr, "Health endpoint started");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(health_listener, health_router()).await {
            error!(error = %e, "Health endpoint server error");
        }
    });

    info!(
        addr = %config.addr,
        image = %state.injector.defaults().container_image,
        "Starting sidecar injector webhook"
    );

    axum_server::bind_rustls(config.addr, tls_config)
        .serve(webhook_router(state).into_make_service())
        .await?;

    Ok(())
}
