//! Pod image tag policy

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Deserialize;
use tracing::debug;

use super::{parse_object, Hook, HookError, HookRequest, Operation, ResourceKind, Verdict};

/// Image reference suffix of the mutable tag pods may not use
pub const MUTABLE_TAG_SUFFIX: &str = ":latest";

pub const MUTABLE_TAG_MESSAGE: &str = "You cannot use the tag 'latest' in a container.";

const OPERATIONS: &[Operation] = &[Operation::Create];

#[derive(Debug, Deserialize)]
struct Pod {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: PodSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodSpec {
    #[serde(default)]
    containers: Vec<Container>,
    #[serde(default)]
    init_containers: Vec<Container>,
}

#[derive(Debug, Deserialize)]
struct Container {
    #[serde(default)]
    image: String,
}

impl PodSpec {
    fn images(&self) -> impl Iterator<Item = &str> {
        self.init_containers
            .iter()
            .chain(self.containers.iter())
            .map(|c| c.image.as_str())
    }
}

/// Rejects new pods whose containers (init containers included) reference an
/// image by the `:latest` tag. Updates and deletes are not evaluated.
#[derive(Debug, Default, Clone, Copy)]
pub struct PodHook;

impl Hook for PodHook {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Pods
    }

    fn operations(&self) -> &'static [Operation] {
        OPERATIONS
    }

    fn admit(&self, request: &HookRequest) -> Result<Verdict, HookError> {
        let pod = match parse_object::<Pod>(request.object.as_ref(), "object") {
            Ok(pod) => pod,
            Err(message) => return Ok(Verdict::deny(message)),
        };
        debug!(pod = ?pod.metadata.name, "Evaluating pod");

        if pod
            .spec
            .images()
            .any(|image| image.ends_with(MUTABLE_TAG_SUFFIX))
        {
            return Ok(Verdict::deny(MUTABLE_TAG_MESSAGE));
        }

        Ok(Verdict::allow())
    }
}
