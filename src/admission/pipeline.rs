//! Per-request admission pipeline
//!
//! Every request walks `Received -> Decoded -> Dispatched -> Evaluated ->
//! Responded`. A transport failure stops the walk at `Received` with a 4xx; a
//! failure after decoding is internal and answers 500. A request never skips
//! straight from `Received` to `Responded` with a verdict.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use axum::http::{Method, StatusCode};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::codec::{self, TransportError};
use crate::hooks::{
    operation_name, Dispatch, Hook, HookRegistry, HookRequest, ResourceKind, Verdict,
};

/// Position of a request in the pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Received,
    Decoded,
    Dispatched,
    Evaluated,
    Responded,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Decoded => "decoded",
            Stage::Dispatched => "dispatched",
            Stage::Evaluated => "evaluated",
            Stage::Responded => "responded",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no hook registered for {0}")]
    UnknownKind(ResourceKind),

    /// `stage` is the last stage the request reached
    #[error("internal error after stage {stage}: {reason}")]
    Internal { stage: Stage, reason: String },
}

impl PipelineError {
    /// Last stage the request reached before failing
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Transport(_) | PipelineError::UnknownKind(_) => Stage::Received,
            PipelineError::Internal { stage, .. } => *stage,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::Transport(e) => e.status(),
            PipelineError::UnknownKind(_) => StatusCode::NOT_FOUND,
            PipelineError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label used in logs and metrics
    pub fn class(&self) -> &'static str {
        match self {
            PipelineError::Transport(TransportError::MethodNotAllowed(_)) => "method",
            PipelineError::Transport(TransportError::UnsupportedContentType(_)) => "content_type",
            PipelineError::Transport(_) => "decode",
            PipelineError::UnknownKind(_) => "routing",
            PipelineError::Internal { .. } => "internal",
        }
    }
}

/// A completed review, ready to be written back
#[derive(Debug)]
pub struct Reviewed {
    pub uid: String,
    pub operation: &'static str,
    pub allowed: bool,
    /// Serialized AdmissionReview
    pub body: Vec<u8>,
}

/// Decodes, dispatches and answers admission requests
#[derive(Clone)]
pub struct AdmissionPipeline {
    registry: Arc<HookRegistry>,
}

impl AdmissionPipeline {
    pub fn new(registry: HookRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    /// Run one request through the pipeline
    pub fn review(
        &self,
        kind: ResourceKind,
        method: &Method,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<Reviewed, PipelineError> {
        let route = kind.route();
        let result = self.walk(kind, method, content_type, body);

        match &result {
            Ok(reviewed) => {
                info!(
                    route = %route,
                    uid = %reviewed.uid,
                    operation = reviewed.operation,
                    allowed = reviewed.allowed,
                    "Admission request reviewed"
                );
                #[cfg(feature = "metrics")]
                crate::metrics::record_review(kind, reviewed.operation, reviewed.allowed);
            }
            Err(e) => {
                let stage = e.stage();
                if e.status().is_server_error() {
                    error!(route = %route, class = e.class(), %stage, "Admission request failed: {}", e);
                } else {
                    warn!(route = %route, class = e.class(), %stage, "Admission request rejected: {}", e);
                }
                #[cfg(feature = "metrics")]
                crate::metrics::record_error(kind, e.class());
            }
        }

        result
    }

    fn walk(
        &self,
        kind: ResourceKind,
        method: &Method,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<Reviewed, PipelineError> {
        if !self.registry.contains(kind) {
            return Err(PipelineError::UnknownKind(kind));
        }
        debug!(stage = %Stage::Received, "Admission request received");

        let decoded = codec::decode(method, content_type, body)?;
        let request = &decoded.envelope;
        debug!(stage = %Stage::Decoded, uid = %request.uid, "Admission request decoded");

        let dispatch = self
            .registry
            .dispatch(kind, &request.operation)
            .ok_or_else(|| PipelineError::Internal {
                stage: Stage::Decoded,
                reason: format!("no hook registered for {kind}"),
            })?;
        debug!(stage = %Stage::Dispatched, uid = %request.uid, "Admission request dispatched");

        let verdict = match dispatch {
            Dispatch::Evaluate(hook) => evaluate(hook, &decoded.hook_request)?,
            Dispatch::Unhandled => Verdict::allow(),
        };
        debug!(stage = %Stage::Evaluated, uid = %request.uid, allowed = verdict.allowed, "Admission request evaluated");

        let internal = |e: codec::EncodeError| PipelineError::Internal {
            stage: Stage::Evaluated,
            reason: e.to_string(),
        };
        let response = codec::build_response(request, &verdict).map_err(internal)?;
        let allowed = response.allowed;
        let body = codec::encode(response).map_err(internal)?;
        debug!(stage = %Stage::Responded, uid = %request.uid, "Admission response encoded");

        Ok(Reviewed {
            uid: request.uid.clone(),
            operation: operation_name(&request.operation),
            allowed,
            body,
        })
    }
}

fn evaluate(hook: &dyn Hook, request: &HookRequest) -> Result<Verdict, PipelineError> {
    match panic::catch_unwind(AssertUnwindSafe(|| hook.admit(request))) {
        Ok(Ok(verdict)) => Ok(verdict),
        Ok(Err(e)) => Err(PipelineError::Internal {
            stage: Stage::Dispatched,
            reason: e.to_string(),
        }),
        Err(payload) => Err(PipelineError::Internal {
            stage: Stage::Dispatched,
            reason: format!("hook panicked: {}", panic_message(payload.as_ref())),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
