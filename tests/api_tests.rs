use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use hive::api::router;
use hive::config::NodeConfig;
use hive::engine::Engine;
use hive::error::Result;
use hive::proxy::{ForwardRequest, ForwardResponse, Forwarder};
use hive::store::{KeyValueStore, MemoryStore};

/// Records forwarded requests and answers with a fixed daemon response.
#[derive(Default)]
struct RecordingForwarder {
    requests: Mutex<Vec<ForwardRequest>>,
}

#[async_trait]
impl Forwarder for RecordingForwarder {
    async fn forward(&self, request: ForwardRequest) -> Result<ForwardResponse> {
        self.requests.lock().unwrap().push(request);
        Ok(ForwardResponse {
            status: 200,
            content_type: Some("application/json".to_string()),
            body: Bytes::from_static(b"[{\"Id\":\"abc123\"}]"),
        })
    }
}

struct TestApp {
    app: Router,
    engine: Arc<Engine>,
    store: MemoryStore,
    forwarder: Arc<RecordingForwarder>,
}

/// Helper to create an app for node `A` with `B` alive in the same zone
async fn create_test_app() -> TestApp {
    let store = MemoryStore::new();
    let forwarder = Arc::new(RecordingForwarder::default());

    let config = NodeConfig::new("A", "default").with_advertise_host("10.1.1.1");
    let engine = Engine::new(config, Arc::new(store.clone()))
        .unwrap()
        .with_forwarder(forwarder.clone());
    let engine = Arc::new(engine);

    engine.heartbeat_once().await.unwrap();
    engine
        .registry()
        .heartbeat("B", "default", "10.1.1.2:4500")
        .await
        .unwrap();

    TestApp {
        app: router(Arc::clone(&engine)),
        engine,
        store,
        forwarder,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Bytes) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn as_json(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn test_index_and_ping() {
    let test = create_test_app().await;

    let (status, body) = send(&test.app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, format!("Docker Hive {}", hive::VERSION));

    let (status, body) = send(&test.app, get("/ping")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"pong");
}

#[tokio::test]
async fn test_cluster_endpoint() {
    let test = create_test_app().await;
    test.engine.elect_once().await.unwrap();

    let (status, body) = send(&test.app, get("/api/cluster")).await;
    assert_eq!(status, StatusCode::OK);

    let json = as_json(&body);
    assert_eq!(json["node"], "A");
    assert_eq!(json["role"], "leader");
    assert_eq!(json["leader"], "A");
    assert_eq!(json["term"], 1);
    assert_eq!(json["run_policy"], "random");
    assert_eq!(json["nodes"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_nodes_endpoint_filters_by_zone() {
    let test = create_test_app().await;
    test.engine
        .registry()
        .heartbeat("C", "rack1", "10.1.2.1:4500")
        .await
        .unwrap();

    let (_, body) = send(&test.app, get("/api/nodes")).await;
    assert_eq!(as_json(&body).as_array().unwrap().len(), 3);

    let (_, body) = send(&test.app, get("/api/nodes?zone=rack1")).await;
    assert_eq!(as_json(&body), json!([{ "zone": "rack1", "name": "C" }]));
}

#[tokio::test]
async fn test_container_job_lifecycle() {
    let test = create_test_app().await;

    let (status, body) = send(
        &test.app,
        post_json(
            "/api/jobs/containers",
            json!({ "Name": "web", "Image": "nginx", "NumberOfInstances": 2 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let json = as_json(&body);
    assert_eq!(json["Id"], "web");
    assert_eq!(json["Nodes"].as_array().unwrap().len(), 2);

    let (status, body) = send(&test.app, get("/api/jobs/containers/web")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_json(&body)["Image"], "nginx");

    let (_, body) = send(&test.app, get("/api/jobs/containers")).await;
    assert_eq!(as_json(&body), json!(["web"]));

    let (status, body) = send(&test.app, get("/api/assignments")).await;
    assert_eq!(status, StatusCode::OK);
    let assignments = as_json(&body);
    // A only has an entry if the random draw picked it
    assert!(assignments.as_array().unwrap().len() <= 1);

    let (status, _) = send(&test.app, delete("/api/jobs/containers/web")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&test.app, delete("/api/jobs/containers/web")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&test.app, get("/api/jobs/containers/web")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_submission_errors_map_to_status_codes() {
    let test = create_test_app().await;

    let (status, body) = send(
        &test.app,
        post_json(
            "/api/jobs/containers",
            json!({ "Name": "web", "Image": "nginx", "Zone": "rack9" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(as_json(&body)["error"].as_str().unwrap().contains("rack9"));

    let (status, _) = send(
        &test.app,
        post_json("/api/jobs/containers", json!({ "Image": "nginx" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    test.store.set_available(false);
    let (status, _) = send(
        &test.app,
        post_json("/api/jobs/containers", json!({ "Name": "web", "Image": "nginx" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, _) = send(&test.app, get("/api/cluster")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_oversized_instance_count_is_a_bad_request() {
    let test = create_test_app().await;

    let (status, body) = send(
        &test.app,
        post_json(
            "/api/jobs/containers",
            json!({ "Name": "web", "Image": "nginx", "NumberOfInstances": 4294967295u32 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(as_json(&body)["error"].as_str().unwrap().contains("exceeds"));
    assert!(test.store.keys_with_prefix("jobs:").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_image_job_with_slashes_in_reference() {
    let test = create_test_app().await;

    let (status, body) = send(
        &test.app,
        post_json("/api/jobs/images", json!({ "Image": "library/nginx:latest" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(as_json(&body)["Accepted"], true);

    let (status, body) = send(&test.app, get("/api/jobs/images/library/nginx:latest")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_json(&body)["Zone"], "default");

    let (status, _) = send(&test.app, delete("/api/jobs/images/library/nginx:latest")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&test.app, delete("/api/jobs/images/library/nginx:latest")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_daemon_requests_are_forwarded() {
    let test = create_test_app().await;

    let (status, body) = send(&test.app, get("/v1.24/containers/json?all=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_json(&body)[0]["Id"], "abc123");

    let (status, _) = send(
        &test.app,
        post_json("/v1.24/containers/create", json!({ "Image": "busybox" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let requests = test.forwarder.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path_and_query, "/v1.24/containers/json?all=1");
    assert_eq!(requests[1].method, "POST");
    assert_eq!(requests[1].content_type.as_deref(), Some("application/json"));
    assert_eq!(as_json(&requests[1].body)["Image"], "busybox");
}

#[tokio::test]
async fn test_unknown_paths_are_not_forwarded() {
    let test = create_test_app().await;

    let (status, _) = send(&test.app, get("/containers/json")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(test.forwarder.requests.lock().unwrap().is_empty());
}
