//! Admission request handling
//!
//! [`codec`] owns the AdmissionReview wire format; [`pipeline`] drives a
//! request from raw body to encoded verdict.

pub mod codec;
pub mod pipeline;

pub use codec::{EncodeError, TransportError, JSON_CONTENT_TYPE};
pub use pipeline::{AdmissionPipeline, PipelineError, Reviewed, Stage};
