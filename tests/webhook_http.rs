//! HTTP-level behaviour of the webhook router, driven in-process.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use kgv::hooks::{
    Hook, HookError, HookRegistry, HookRequest, Operation, ResourceKind, Verdict,
    MUTABLE_TAG_MESSAGE, RESERVED_NAMESPACE_MESSAGE,
};
use kgv::webhook::{WebhookServer, HEALTH_BODY, MAX_BODY_BYTES};
use serde_json::{json, Value};
use tower::ServiceExt;

const UID: &str = "705ab4f5-6393-11e8-b7cc-42010a800002";

fn router() -> Router {
    WebhookServer::new(HookRegistry::builtin()).router()
}

fn review(kind: &str, resource: &str, operation: &str, object: Value, old_object: Value) -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": UID,
            "kind": {"group": if kind == "Deployment" { "apps" } else { "" }, "version": "v1", "kind": kind},
            "resource": {"group": if kind == "Deployment" { "apps" } else { "" }, "version": "v1", "resource": resource},
            "operation": operation,
            "userInfo": {"username": "kubernetes-admin", "groups": ["system:masters"]},
            "object": object,
            "oldObject": old_object,
        }
    })
}

fn deployment(namespace: &str) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": "web", "namespace": namespace},
        "spec": {
            "selector": {"matchLabels": {"app": "web"}},
            "template": {
                "metadata": {"labels": {"app": "web"}},
                "spec": {"containers": [{"name": "web", "image": "nginx:1.21"}]}
            }
        }
    })
}

fn pod(image: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": "web", "namespace": "default"},
        "spec": {"containers": [{"name": "web", "image": image}]}
    })
}

fn post(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

async fn send(request: Request<Body>) -> (StatusCode, Vec<u8>) {
    send_to(router(), request).await
}

async fn send_to(router: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    (status, body.to_vec())
}

/// POST a review and return the decoded `response` object
async fn admit(uri: &str, body: &Value) -> Value {
    let (status, body) = send(post(uri, body)).await;
    assert_eq!(status, StatusCode::OK);
    let review: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(review["apiVersion"], "admission.k8s.io/v1");
    assert_eq!(review["kind"], "AdmissionReview");
    review["response"].clone()
}

#[tokio::test]
async fn healthz_answers_any_method() {
    for method in ["GET", "POST", "PUT", "DELETE"] {
        let request = Request::builder()
            .method(method)
            .uri("/healthz")
            .body(Body::from("ignored"))
            .unwrap();
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, HEALTH_BODY.as_bytes());
    }
}

#[tokio::test]
async fn deployment_update_in_default_namespace_is_allowed() {
    let response = admit(
        "/v1/validate/deployments",
        &review(
            "Deployment",
            "deployments",
            "UPDATE",
            deployment("default"),
            deployment("default"),
        ),
    )
    .await;
    assert_eq!(response["uid"], UID);
    assert_eq!(response["allowed"], true);
}

#[tokio::test]
async fn deployment_update_in_special_namespace_is_denied() {
    let response = admit(
        "/v1/validate/deployments",
        &review(
            "Deployment",
            "deployments",
            "UPDATE",
            deployment("default"),
            deployment("special"),
        ),
    )
    .await;
    assert_eq!(response["uid"], UID);
    assert_eq!(response["allowed"], false);
    assert_eq!(response["status"]["message"], RESERVED_NAMESPACE_MESSAGE);
}

#[tokio::test]
async fn deployment_create_in_special_namespace_is_denied() {
    let response = admit(
        "/v1/validate/deployments",
        &review("Deployment", "deployments", "CREATE", deployment("special"), Value::Null),
    )
    .await;
    assert_eq!(response["allowed"], false);
}

#[tokio::test]
async fn deployment_delete_is_not_policed() {
    let response = admit(
        "/v1/validate/deployments",
        &review("Deployment", "deployments", "DELETE", Value::Null, deployment("special")),
    )
    .await;
    assert_eq!(response["allowed"], true);
}

#[tokio::test]
async fn pod_with_latest_tag_is_denied() {
    let response = admit(
        "/v1/validate/pods",
        &review("Pod", "pods", "CREATE", pod("nginx:latest"), Value::Null),
    )
    .await;
    assert_eq!(response["uid"], UID);
    assert_eq!(response["allowed"], false);
    assert_eq!(response["status"]["message"], MUTABLE_TAG_MESSAGE);
}

#[tokio::test]
async fn pod_with_pinned_tag_is_allowed() {
    let response = admit(
        "/v1/validate/pods",
        &review("Pod", "pods", "CREATE", pod("nginx:1.21"), Value::Null),
    )
    .await;
    assert_eq!(response["allowed"], true);
    assert!(response.get("patch").is_none());
}

#[tokio::test]
async fn pod_update_is_allowed_without_evaluation() {
    let response = admit(
        "/v1/validate/pods",
        &review("Pod", "pods", "UPDATE", pod("nginx:latest"), pod("nginx:1.21")),
    )
    .await;
    assert_eq!(response["uid"], UID);
    assert_eq!(response["allowed"], true);
}

#[tokio::test]
async fn unreadable_objects_are_denied_with_parse_error() {
    let mut numeric_namespace = deployment("default");
    numeric_namespace["metadata"]["namespace"] = json!(5);

    let mut string_metadata = deployment("default");
    string_metadata["metadata"] = json!("special");

    let mut numeric_label = pod("nginx:latest");
    numeric_label["metadata"]["labels"] = json!({"tier": 1});

    let cases = [
        (
            "/v1/validate/deployments",
            review("Deployment", "deployments", "CREATE", numeric_namespace, Value::Null),
            "invalid type: integer `5`",
        ),
        (
            "/v1/validate/deployments",
            review("Deployment", "deployments", "CREATE", string_metadata, Value::Null),
            "invalid type: string",
        ),
        (
            "/v1/validate/pods",
            review("Pod", "pods", "CREATE", numeric_label, Value::Null),
            "invalid type: integer `1`",
        ),
    ];

    for (uri, body, expected) in cases {
        let response = admit(uri, &body).await;
        assert_eq!(response["uid"], UID);
        assert_eq!(response["allowed"], false, "{uri}: {response}");
        let message = response["status"]["message"].as_str().unwrap();
        assert!(message.contains(expected), "{uri}: {message}");
    }
}

struct Failing;

impl Hook for Failing {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Pods
    }

    fn operations(&self) -> &'static [Operation] {
        &[Operation::Create]
    }

    fn admit(&self, _: &HookRequest) -> Result<Verdict, HookError> {
        Err(HookError::Evaluation("registry backend unavailable".to_string()))
    }
}

#[tokio::test]
async fn failing_hook_is_internal_server_error() {
    let router = WebhookServer::new(HookRegistry::new().with_hook(Failing)).router();
    let body = review("Pod", "pods", "CREATE", pod("nginx:1.21"), Value::Null);

    let (status, body) = send_to(router, post("/v1/validate/pods", &body)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("registry backend unavailable"), "{text}");
    assert!(serde_json::from_str::<Value>(&text).is_err());
}

#[tokio::test]
async fn non_post_is_method_not_allowed() {
    let request = Request::builder()
        .method("GET")
        .uri("/v1/validate/pods")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::empty())
        .unwrap();
    let response = router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[header::ALLOW], "POST");
}

#[tokio::test]
async fn non_json_content_type_is_bad_request() {
    let body = review("Pod", "pods", "CREATE", pod("nginx:latest"), Value::Null);
    let request = Request::builder()
        .method("POST")
        .uri("/v1/validate/pods")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let (status, body) = send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(String::from_utf8(body).unwrap().contains("application/json"));
}

#[tokio::test]
async fn review_without_request_is_bad_request() {
    let body = json!({"apiVersion": "admission.k8s.io/v1", "kind": "AdmissionReview"});
    let (status, body) = send(post("/v1/validate/pods", &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(String::from_utf8(body).unwrap().contains("request"));
}

#[tokio::test]
async fn undecodable_body_is_bad_request() {
    let request = Request::builder()
        .method("POST")
        .uri("/v1/validate/deployments")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"apiVersion\": "))
        .unwrap();
    let (status, _) = send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_kind_is_not_found() {
    let body = review("Service", "services", "CREATE", json!({"metadata": {"name": "s"}}), Value::Null);
    let (status, _) = send(post("/v1/validate/services", &body)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(post("/v1/mutate/pods", &body)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let request = Request::builder()
        .method("POST")
        .uri("/v1/validate/pods")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(vec![b' '; MAX_BODY_BYTES + 1]))
        .unwrap();
    let (status, _) = send(request).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn uid_is_echoed_for_every_verdict() {
    let cases = [
        ("/v1/validate/pods", review("Pod", "pods", "CREATE", pod("nginx:latest"), Value::Null)),
        ("/v1/validate/pods", review("Pod", "pods", "CREATE", pod("nginx"), Value::Null)),
        (
            "/v1/validate/deployments",
            review("Deployment", "deployments", "CREATE", deployment("special"), Value::Null),
        ),
    ];

    for (i, (uri, mut body)) in cases.into_iter().enumerate() {
        let uid = format!("11111111-2222-4333-8444-55555555555{i}");
        body["request"]["uid"] = json!(uid);
        let response = admit(uri, &body).await;
        assert_eq!(response["uid"], uid);
    }
}

#[cfg(feature = "metrics")]
#[tokio::test]
async fn metrics_endpoint_exposes_review_counters() {
    admit(
        "/v1/validate/pods",
        &review("Pod", "pods", "CREATE", pod("nginx:latest"), Value::Null),
    )
    .await;

    let request = Request::builder()
        .method("GET")
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(request).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("kgv_admission_reviews_total"));
    assert!(text.contains(r#"route="/v1/validate/pods""#));
}
