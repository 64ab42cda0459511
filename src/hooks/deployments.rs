//! Deployment namespace policy

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Deserialize;
use tracing::debug;

use super::{parse_object, Hook, HookError, HookRequest, Operation, ResourceKind, Verdict};

/// Namespace deployments may not be placed in
pub const RESERVED_NAMESPACE: &str = "special";

pub const RESERVED_NAMESPACE_MESSAGE: &str =
    "You cannot create a deployment in `special` namespace.";

const OPERATIONS: &[Operation] = &[Operation::Create, Operation::Update];

/// Only metadata is read, but it is read in full so a malformed one is denied
#[derive(Debug, Deserialize)]
struct Deployment {
    #[serde(default)]
    metadata: ObjectMeta,
}

/// Rejects deployments in [`RESERVED_NAMESPACE`].
///
/// Creates are judged on the new object. Updates are judged on the *old*
/// object, so a deployment that already lives in the reserved namespace cannot
/// be changed either.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeploymentHook;

impl Hook for DeploymentHook {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Deployments
    }

    fn operations(&self) -> &'static [Operation] {
        OPERATIONS
    }

    fn admit(&self, request: &HookRequest) -> Result<Verdict, HookError> {
        let parsed = match request.operation {
            Operation::Update => parse_object::<Deployment>(request.old_object.as_ref(), "oldObject"),
            _ => parse_object::<Deployment>(request.object.as_ref(), "object"),
        };

        let deployment = match parsed {
            Ok(deployment) => deployment,
            Err(message) => return Ok(Verdict::deny(message)),
        };

        let namespace = deployment.metadata.namespace.unwrap_or_default();
        debug!(namespace = %namespace, "Evaluating deployment");

        if namespace == RESERVED_NAMESPACE {
            return Ok(Verdict::deny(RESERVED_NAMESPACE_MESSAGE));
        }

        Ok(Verdict::allow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::testing::request;
    use serde_json::{json, Value};

    fn deployment(namespace: &str) -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": namespace},
            "spec": {"replicas": 1}
        })
    }

    #[test]
    fn create_outside_reserved_namespace_is_allowed() {
        let req = request("CREATE", deployment("default"), Value::Null);
        let verdict = DeploymentHook.admit(&req).unwrap();
        assert!(verdict.allowed);
        assert!(verdict.patch.is_empty());
    }

    #[test]
    fn create_in_reserved_namespace_is_denied() {
        let req = request("CREATE", deployment("special"), Value::Null);
        let verdict = DeploymentHook.admit(&req).unwrap();
        assert!(!verdict.allowed);
        assert_eq!(
            verdict.message,
            "You cannot create a deployment in `special` namespace."
        );
    }

    #[test]
    fn update_is_judged_on_the_old_object() {
        let req = request(
            "UPDATE",
            deployment("default"),
            deployment("special"),
        );
        let verdict = DeploymentHook.admit(&req).unwrap();
        assert!(!verdict.allowed);
        assert_eq!(verdict.message, RESERVED_NAMESPACE_MESSAGE);

        let req = request(
            "UPDATE",
            deployment("special"),
            deployment("default"),
        );
        assert!(DeploymentHook.admit(&req).unwrap().allowed);
    }

    #[test]
    fn missing_namespace_is_allowed() {
        let object = json!({"metadata": {"name": "web"}});
        let req = request("CREATE", object, Value::Null);
        assert!(DeploymentHook.admit(&req).unwrap().allowed);
    }

    #[test]
    fn unreadable_object_is_a_denial_not_an_error() {
        let object = json!({"metadata": {"name": "web", "namespace": "default"}});
        let req = request("UPDATE", object, Value::Null);
        let verdict = DeploymentHook.admit(&req).unwrap();
        assert!(!verdict.allowed);
        assert_eq!(verdict.message, "admission request has no oldObject");
    }

    #[test]
    fn malformed_metadata_is_denied_with_parse_error() {
        let object = json!({"metadata": {"name": "web", "namespace": 5}});
        let verdict = DeploymentHook
            .admit(&request("CREATE", object, Value::Null))
            .unwrap();
        assert!(!verdict.allowed);
        assert!(verdict.message.contains("invalid type: integer `5`"), "{}", verdict.message);

        let object = json!({"metadata": "special"});
        let verdict = DeploymentHook
            .admit(&request("CREATE", object, Value::Null))
            .unwrap();
        assert!(!verdict.allowed);
        assert!(verdict.message.contains("invalid type: string"), "{}", verdict.message);
    }

    #[test]
    fn registers_create_and_update_only() {
        assert_eq!(
            DeploymentHook.operations(),
            &[Operation::Create, Operation::Update]
        );
    }
}
