//! Admission Webhook Server
//!
//! Serves the health probe and one validating route per registered resource
//! kind over HTTPS. Handlers are thin: everything between the raw body and the
//! response bytes happens in [`AdmissionPipeline`].

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::admission::AdmissionPipeline;
use crate::certs::TlsPaths;
use crate::error::{Error, Result};
use crate::hooks::{HookRegistry, ResourceKind};

/// Liveness probe path
pub const HEALTH_PATH: &str = "/healthz";

/// Body returned by the liveness probe
pub const HEALTH_BODY: &str = "Ok!";

/// Largest AdmissionReview body accepted, matching the API server's own limit
pub const MAX_BODY_BYTES: usize = 6 * 1024 * 1024;

/// How long in-flight requests may run once shutdown starts
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Webhook server state
#[derive(Clone)]
pub struct WebhookServer {
    pipeline: AdmissionPipeline,
}

impl WebhookServer {
    /// Create a server answering for the hooks in `registry`
    pub fn new(registry: HookRegistry) -> Self {
        Self {
            pipeline: AdmissionPipeline::new(registry),
        }
    }

    /// Build the HTTP router
    pub fn router(&self) -> Router {
        let router = Router::new()
            .route(HEALTH_PATH, any(health_handler))
            .route("/v1/validate/{kind}", any(validate_handler));

        #[cfg(feature = "metrics")]
        let router = router.route("/metrics", axum::routing::get(metrics_handler));

        router
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .layer(TraceLayer::new_for_http())
            .with_state(self.pipeline.clone())
    }

    /// Serve over TLS on `addr` until SIGINT or SIGTERM
    pub async fn start(self, addr: SocketAddr, tls: &TlsPaths) -> Result<()> {
        let rustls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
            .await
            .map_err(|e| {
                Error::ServerError(format!(
                    "Failed to load TLS material from {} and {}: {e}",
                    tls.cert.display(),
                    tls.key.display()
                ))
            })?;

        let handle = Handle::new();
        tokio::spawn(shutdown_on_signal(handle.clone()));

        let routes: Vec<String> = self.pipeline.registry().kinds().map(|k| k.route()).collect();
        info!(%addr, ?routes, "Starting webhook server");

        axum_server::bind_rustls(addr, rustls_config)
            .handle(handle)
            .serve(self.router().into_make_service())
            .await
            .map_err(|e| Error::ServerError(format!("Server error on {addr}: {e}")))?;

        info!("Webhook server stopped");
        Ok(())
    }
}

// HTTP Handlers

async fn health_handler() -> &'static str {
    HEALTH_BODY
}

async fn validate_handler(
    State(pipeline): State<AdmissionPipeline>,
    Path(kind): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let kind = match kind.parse::<ResourceKind>() {
        Ok(kind) => kind,
        Err(e) => {
            debug!("No validating route for {}", kind);
            return (StatusCode::NOT_FOUND, e.to_string()).into_response();
        }
    };

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    match pipeline.review(kind, &method, content_type, &body) {
        Ok(reviewed) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )],
            reviewed.body,
        )
            .into_response(),
        Err(e) => {
            let status = e.status();
            let mut response = (status, e.to_string()).into_response();
            if status == StatusCode::METHOD_NOT_ALLOWED {
                response
                    .headers_mut()
                    .insert(header::ALLOW, HeaderValue::from_static("POST"));
            }
            response
        }
    }
}

#[cfg(feature = "metrics")]
async fn metrics_handler() -> Response {
    match crate::metrics::render() {
        Ok(text) => text.into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn shutdown_on_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(
        grace_period_secs = SHUTDOWN_GRACE_PERIOD.as_secs(),
        "Shutdown signal received, draining in-flight requests"
    );
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE_PERIOD));
}
