//! AdmissionReview wire codec
//!
//! Decoding checks the transport preconditions the API server is expected to
//! honour (POST, JSON) before touching the body, so each failure maps to its
//! own HTTP status. Only the envelope is decoded into typed values: `object`
//! and `oldObject` are lifted out as raw JSON first, so a target object the
//! policy cannot read is judged by the hook instead of failing the transport.
//! Encoding always starts from the decoded envelope, which echoes the request
//! UID by construction.

use axum::http::{Method, StatusCode};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::DynamicObject;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::hooks::{HookRequest, PatchOperation, Verdict};

/// The only content type the webhook accepts
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A request the pipeline refuses before any policy runs
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid method {0}, only POST requests are allowed")]
    MethodNotAllowed(Method),

    #[error("only content type 'application/json' is supported")]
    UnsupportedContentType(Option<String>),

    #[error("could not deserialize request: {0}")]
    Deserialize(#[source] serde_json::Error),

    #[error("malformed admission review: request is missing")]
    MissingRequest,
}

impl TransportError {
    pub fn status(&self) -> StatusCode {
        match self {
            TransportError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            TransportError::UnsupportedContentType(_)
            | TransportError::Deserialize(_)
            | TransportError::MissingRequest => StatusCode::BAD_REQUEST,
        }
    }
}

/// The response could not be put on the wire
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("could not marshal JSON patch: {0}")]
    Patch(String),

    #[error("could not marshal response: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// A decoded admission request
#[derive(Debug)]
pub struct DecodedReview {
    /// Request envelope. Its `object` and `old_object` are always `None`; the
    /// payloads live in `hook_request`.
    pub envelope: AdmissionRequest<DynamicObject>,
    pub hook_request: HookRequest,
}

/// Validate transport preconditions and decode an AdmissionReview body
pub fn decode(
    method: &Method,
    content_type: Option<&str>,
    body: &[u8],
) -> Result<DecodedReview, TransportError> {
    if method != Method::POST {
        return Err(TransportError::MethodNotAllowed(method.clone()));
    }

    if !content_type.is_some_and(is_json) {
        return Err(TransportError::UnsupportedContentType(
            content_type.map(str::to_owned),
        ));
    }

    let mut review: Value = serde_json::from_slice(body).map_err(TransportError::Deserialize)?;

    let (object, old_object) = match review.get_mut("request").and_then(Value::as_object_mut) {
        Some(request) => (take_raw(request, "object"), take_raw(request, "oldObject")),
        None => (None, None),
    };

    let review: AdmissionReview<DynamicObject> =
        serde_json::from_value(review).map_err(TransportError::Deserialize)?;
    let envelope: AdmissionRequest<DynamicObject> = review
        .try_into()
        .map_err(|_| TransportError::MissingRequest)?;

    let hook_request = HookRequest {
        operation: envelope.operation.clone(),
        object,
        old_object,
    };

    Ok(DecodedReview {
        envelope,
        hook_request,
    })
}

/// Turn a verdict into the response for `request`.
///
/// A patch is attached only to an allowing verdict that carries one.
pub fn build_response(
    request: &AdmissionRequest<DynamicObject>,
    verdict: &Verdict,
) -> Result<AdmissionResponse, EncodeError> {
    let mut response = AdmissionResponse::from(request);

    if !verdict.allowed {
        return Ok(response.deny(&verdict.message));
    }

    response.result.message = verdict.message.clone();

    if verdict.patch.is_empty() {
        return Ok(response);
    }

    response
        .with_patch(json_patch(&verdict.patch)?)
        .map_err(|e| EncodeError::Patch(e.to_string()))
}

/// Serialize a response into an AdmissionReview body
pub fn encode(response: AdmissionResponse) -> Result<Vec<u8>, EncodeError> {
    serde_json::to_vec(&response.into_review()).map_err(EncodeError::Serialize)
}

fn take_raw(request: &mut Map<String, Value>, field: &str) -> Option<Value> {
    request.remove(field).filter(|v| !v.is_null())
}

fn json_patch(ops: &[PatchOperation]) -> Result<json_patch::Patch, EncodeError> {
    serde_json::to_value(ops)
        .and_then(serde_json::from_value)
        .map_err(|e| EncodeError::Patch(e.to_string()))
}

/// Media type essence comparison, ignoring parameters such as `charset`
fn is_json(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|essence| essence.eq_ignore_ascii_case(JSON_CONTENT_TYPE))
}
