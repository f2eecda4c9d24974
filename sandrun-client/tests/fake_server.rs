use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, put};
use sandrun_client::pod::{ObjectMeta, Pod, PodPhase, PodSpec, WatchEventType};
use sandrun_client::{ArtifactClient, ClusterClient};

type Objects = Arc<Mutex<HashMap<String, Vec<u8>>>>;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn store_object(
    State(objects): State<Objects>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer secret") {
        return StatusCode::UNAUTHORIZED;
    }
    objects
        .lock()
        .unwrap()
        .insert(format!("{}/{}", bucket, key), body.to_vec());
    StatusCode::OK
}

async fn fetch_object(
    State(objects): State<Objects>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Vec<u8>, StatusCode> {
    objects
        .lock()
        .unwrap()
        .get(&format!("{}/{}", bucket, key))
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)
}

#[tokio::test]
async fn test_artifact_put_then_get() {
    let objects: Objects = Arc::default();
    let app = Router::new()
        .route("/{bucket}/{*key}", put(store_object).get(fetch_object))
        .with_state(objects.clone());
    let base = serve(app).await;

    let client = ArtifactClient::new(&base, "sandrun").with_token("secret");
    let uri = client
        .put(None, "t1/r1/execution.log", b"hello".to_vec(), "text/plain")
        .await
        .unwrap();
    assert_eq!(uri, "s3://sandrun/t1/r1/execution.log");
    assert!(objects.lock().unwrap().contains_key("sandrun/t1/r1/execution.log"));

    let data = client.get(None, "t1/r1/execution.log").await.unwrap();
    assert_eq!(data, b"hello");

    let missing = client.get(Some("other"), "nope").await.unwrap_err();
    assert!(missing.is_not_found());
}

#[tokio::test]
async fn test_artifact_put_rejected_without_token() {
    let app = Router::new()
        .route("/{bucket}/{*key}", put(store_object).get(fetch_object))
        .with_state(Objects::default());
    let base = serve(app).await;

    let client = ArtifactClient::new(&base, "sandrun");
    let err = client
        .put(None, "k", Vec::new(), "application/octet-stream")
        .await
        .unwrap_err();
    assert!(!err.is_not_found());
    assert!(err.to_string().contains("401"));
}

async fn create_pod(Path(_ns): Path<String>, body: Bytes) -> (StatusCode, Bytes) {
    (StatusCode::CREATED, body)
}

async fn watch_pods(
    Path(_ns): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<String, StatusCode> {
    if query.get("watch").map(String::as_str) != Some("true") {
        return Err(StatusCode::BAD_REQUEST);
    }
    if query.get("fieldSelector").map(String::as_str) != Some("metadata.name=sandbox-r1") {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(concat!(
        r#"{"type":"ADDED","object":{"metadata":{"name":"sandbox-r1"},"status":{"phase":"Pending"}}}"#,
        "\n",
        "not json\n",
        "\n",
        r#"{"type":"MODIFIED","object":{"metadata":{"name":"sandbox-r1"},"status":{"phase":"Succeeded"}}}"#
    )
    .to_string())
}

async fn pod_log(
    Path((_ns, name)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> String {
    format!(
        "{} {} 3 passed",
        name,
        query.get("container").cloned().unwrap_or_default()
    )
}

async fn delete_pod(Path((_ns, name)): Path<(String, String)>) -> StatusCode {
    if name == "sandbox-r1" {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

fn cluster_app() -> Router {
    Router::new()
        .route(
            "/api/v1/namespaces/{ns}/pods",
            axum::routing::post(create_pod).get(watch_pods),
        )
        .route("/api/v1/namespaces/{ns}/pods/{name}", delete(delete_pod))
        .route("/api/v1/namespaces/{ns}/pods/{name}/log", get(pod_log))
}

#[tokio::test]
async fn test_cluster_pod_lifecycle() {
    let base = serve(cluster_app()).await;
    let client = ClusterClient::new(&base, "sandboxes").with_token("t");

    let pod = Pod::new(
        ObjectMeta {
            name: "sandbox-r1".to_string(),
            ..Default::default()
        },
        PodSpec::default(),
    );
    let created = client.create_pod(&pod).await.unwrap();
    assert_eq!(created.metadata.name, "sandbox-r1");

    let mut watch = client.watch_pod("sandbox-r1").await.unwrap();
    let first = watch.next_event().await.unwrap().unwrap();
    assert_eq!(first.event_type, WatchEventType::Added);
    assert_eq!(first.pod().unwrap().phase(), PodPhase::Pending);

    // undecodable and blank lines are skipped; the unterminated last line is kept
    let second = watch.next_event().await.unwrap().unwrap();
    assert_eq!(second.pod().unwrap().phase(), PodPhase::Succeeded);
    assert!(watch.next_event().await.unwrap().is_none());

    let logs = client.pod_logs("sandbox-r1", "runner").await.unwrap();
    assert_eq!(logs, "sandbox-r1 runner 3 passed");

    assert!(client.delete_pod("sandbox-r1").await.unwrap());
    assert!(!client.delete_pod("sandbox-gone").await.unwrap());
}
