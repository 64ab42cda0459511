//! kgv: Kubernetes validating admission webhook
//!
//! This crate provides an HTTPS admission webhook that rejects Deployments in
//! the reserved `special` namespace and Pods using the mutable `:latest` image
//! tag. When no certificate is supplied it bootstraps its own CA and server
//! certificate before accepting traffic.

pub mod admission;
pub mod certs;
pub mod config;
pub mod error;
pub mod hooks;
pub mod telemetry;
pub mod webhook;

#[cfg(feature = "metrics")]
pub mod metrics;

pub use crate::error::{Error, Result};
