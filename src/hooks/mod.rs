//! Admission hooks
//!
//! A [`Hook`] holds the policy for one resource kind. It declares which
//! operations it evaluates; the [`HookRegistry`] maps resource kinds (as named in
//! the webhook route) to hooks and is frozen once the server starts.
//!
//! Policies only see the fields they need. Objects reach a hook as raw JSON in
//! a [`HookRequest`] and are parsed there into small local structs, so a payload
//! the policy cannot read becomes a denial carrying the parse error rather than
//! a transport or server fault.

mod deployments;
mod pods;
mod registry;

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use deployments::{DeploymentHook, RESERVED_NAMESPACE, RESERVED_NAMESPACE_MESSAGE};
pub use kube::core::admission::Operation;
pub use pods::{PodHook, MUTABLE_TAG_MESSAGE, MUTABLE_TAG_SUFFIX};
pub use registry::{Dispatch, HookRegistry};

/// Resource kinds the webhook can be registered for, by route segment
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Deployments,
    Pods,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Deployments => "deployments",
            ResourceKind::Pods => "pods",
        }
    }

    /// HTTP path the API server calls for this kind
    pub fn route(&self) -> String {
        format!("/v1/validate/{}", self.as_str())
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown resource kind: {0}")]
pub struct UnknownResourceKind(pub String);

impl FromStr for ResourceKind {
    type Err = UnknownResourceKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deployments" => Ok(ResourceKind::Deployments),
            "pods" => Ok(ResourceKind::Pods),
            other => Err(UnknownResourceKind(other.to_string())),
        }
    }
}

/// Upper-case wire name of an admission operation
pub fn operation_name(operation: &Operation) -> &'static str {
    match operation {
        Operation::Create => "CREATE",
        Operation::Update => "UPDATE",
        Operation::Delete => "DELETE",
        Operation::Connect => "CONNECT",
    }
}

/// JSON patch operation kind (RFC 6902 subset without `move`/`copy`)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
    Test,
}

/// A single mutation the API server applies to the admitted object
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl PatchOperation {
    pub fn add(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchOp::Remove,
            path: path.into(),
            value: None,
        }
    }
}

/// Outcome of a hook evaluation
#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
    pub allowed: bool,
    /// Human-readable reason, empty when there is nothing to say
    pub message: String,
    /// Mutations to apply; only honoured when `allowed`
    pub patch: Vec<PatchOperation>,
}

impl Verdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            message: String::new(),
            patch: Vec::new(),
        }
    }

    pub fn deny(message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            message: message.into(),
            patch: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_patch(mut self, patch: Vec<PatchOperation>) -> Self {
        self.patch = patch;
        self
    }
}

/// The part of an admission request a hook evaluates.
///
/// `object` and `old_object` are the raw payloads; `null` and absent are both
/// `None`.
#[derive(Debug, Clone)]
pub struct HookRequest {
    pub operation: Operation,
    pub object: Option<Value>,
    pub old_object: Option<Value>,
}

/// Failure of a hook that is not a policy decision
#[derive(Error, Debug)]
pub enum HookError {
    #[error("hook evaluation failed: {0}")]
    Evaluation(String),
}

/// Policy for a single resource kind.
///
/// Implementations must be stateless across requests: hooks are shared by every
/// in-flight request without synchronisation.
pub trait Hook: Send + Sync {
    /// Resource kind this hook is registered under
    fn kind(&self) -> ResourceKind;

    /// Operations this hook evaluates. Anything else is allowed without calling
    /// [`Hook::admit`].
    fn operations(&self) -> &'static [Operation];

    /// Evaluate `request`. Only called for operations listed in
    /// [`Hook::operations`], and must return a verdict or an error for each.
    fn admit(&self, request: &HookRequest) -> Result<Verdict, HookError>;
}

/// Parse a raw admission object into a policy-local view
pub(crate) fn parse_object<T: DeserializeOwned>(
    object: Option<&Value>,
    field: &str,
) -> Result<T, String> {
    let object = object.ok_or_else(|| format!("admission request has no {field}"))?;
    T::deserialize(object).map_err(|e| e.to_string())
}
