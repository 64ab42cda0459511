//! Webhook Module
//!
//! HTTPS front end of the admission webhook:
//!
//! - `/healthz` answers `200 Ok!` to any method.
//! - `/v1/validate/{kind}` feeds AdmissionReview bodies to the admission pipeline.
//! - `/metrics` exposes Prometheus counters when built with the `metrics` feature.
//!
//! # Example
//!
//! ```rust,ignore
//! use kgv::hooks::HookRegistry;
//! use kgv::webhook::WebhookServer;
//!
//! let server = WebhookServer::new(HookRegistry::builtin());
//! server.start("0.0.0.0:8443".parse()?, &tls_paths).await?;
//! ```

pub mod server;

pub use server::{
    WebhookServer, HEALTH_BODY, HEALTH_PATH, MAX_BODY_BYTES, SHUTDOWN_GRACE_PERIOD,
};
