//! Crate-level error types
//!
//! Everything in here is fatal to process startup. Per-request failures live in
//! [`crate::admission`] and never reach this type.

use thiserror::Error;

use crate::certs::CertificateError;
use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad or missing CLI / file configuration
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Key or certificate generation, or certificate persistence, failed
    #[error("Certificate error: {0}")]
    CertificateError(#[from] CertificateError),

    /// The TLS listener could not be configured or stopped with an error
    #[error("Server error: {0}")]
    ServerError(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
