//! Prometheus metrics for the admission webhook
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports the following metrics:
//! - `kgv_admission_reviews_total` (counter): completed reviews labeled by route/operation/allowed.
//! - `kgv_admission_errors_total` (counter): requests answered with an HTTP error, labeled by route/class.

use std::sync::atomic::AtomicU64;

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

use crate::hooks::ResourceKind;

/// Labels for completed admission reviews
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReviewLabels {
    /// Route path, e.g. "/v1/validate/pods"
    pub route: String,
    /// Admission operation, e.g. "CREATE"
    pub operation: String,
    pub allowed: String,
}

/// Labels for failed admission requests
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub route: String,
    /// Failure class, e.g. "method", "decode", "internal"
    pub class: String,
}

pub static ADMISSION_REVIEWS_TOTAL: Lazy<Family<ReviewLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static ADMISSION_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "kgv_admission_reviews",
        "Total number of admission reviews answered with a verdict",
        ADMISSION_REVIEWS_TOTAL.clone(),
    );
    registry.register(
        "kgv_admission_errors",
        "Total number of admission requests answered with an HTTP error",
        ADMISSION_ERRORS_TOTAL.clone(),
    );

    registry
});

/// Increment the review counter.
pub fn record_review(kind: ResourceKind, operation: &str, allowed: bool) {
    let labels = ReviewLabels {
        route: kind.route(),
        operation: operation.to_string(),
        allowed: allowed.to_string(),
    };
    ADMISSION_REVIEWS_TOTAL.get_or_create(&labels).inc();
}

/// Increment the error counter.
pub fn record_error(kind: ResourceKind, class: &str) {
    let labels = ErrorLabels {
        route: kind.route(),
        class: class.to_string(),
    };
    ADMISSION_ERRORS_TOTAL.get_or_create(&labels).inc();
}

/// Render the registry in the Prometheus text format
pub fn render() -> Result<String, std::fmt::Error> {
    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, &REGISTRY)?;
    Ok(buffer)
}
