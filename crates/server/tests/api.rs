//! Router-level tests against the in-memory broker and stores.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tower::ServiceExt;

use intake_core::config::Config;
use intake_core::{IngestionMessage, JobId, JobStatus, NewRepo, NotificationMessage, INGESTION_QUEUE};
use intake_notify::{JobEvent, Notifier, SubscriberHub};
use intake_queue::{MemoryBroker, MemoryConnector, QueueHandle};
use intake_server::{build_router, AppState};
use intake_storage::{JobStore, MemoryJobStore, MemoryRepoStore, RepoStore, Stores};

struct TestApp {
    broker: Arc<MemoryBroker>,
    jobs: Arc<MemoryJobStore>,
    repos: Arc<MemoryRepoStore>,
    state: Arc<AppState>,
    _uploads: tempfile::TempDir,
}

async fn test_app() -> TestApp {
    let uploads = tempfile::tempdir().unwrap();
    let mut config = Config::for_profile("");
    config.server.upload_dir = uploads.path().to_path_buf();
    config.server.cors_origin = "*".into();
    config.queue.ingestion_queue = INGESTION_QUEUE.into();

    let broker = MemoryBroker::new();
    let gateway = QueueHandle::spawn(Arc::new(MemoryConnector::new(broker.clone())), Duration::from_secs(5));
    gateway.declare(INGESTION_QUEUE).await.unwrap();

    let jobs = Arc::new(MemoryJobStore::new());
    let repos = Arc::new(MemoryRepoStore::new());
    let stores = Stores {
        jobs: jobs.clone(),
        repos: repos.clone(),
    };
    let state = Arc::new(AppState::new(config, stores, gateway, SubscriberHub::new(16)));
    TestApp {
        broker,
        jobs,
        repos,
        state,
        _uploads: uploads,
    }
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = build_router(app.state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn upload(field: &str, filename: &str, contents: &str) -> Request<Body> {
    let boundary = "intake-test-boundary";
    let body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
         Content-Type: text/csv\r\n\r\n{contents}\r\n--{boundary}--\r\n"
    );
    Request::builder()
        .method("POST")
        .uri("/import/csv")
        .header("content-type", format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn upload_creates_pending_job_and_enqueues_it() {
    let app = test_app().await;
    let (status, body) = send(&app, upload("file", "repos.csv", "name,owner,stars\nr1,o1,1\n")).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = JobId(body["jobId"].as_i64().unwrap());
    let file_path = body["filePath"].as_str().unwrap().to_string();
    assert!(file_path.ends_with("-repos.csv"));
    assert_eq!(
        std::fs::read_to_string(&file_path).unwrap(),
        "name,owner,stars\nr1,o1,1\n"
    );

    let job = app.state.status.get_job_status(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.file_path, file_path);

    let queued = app.broker.pending_bodies(INGESTION_QUEUE);
    assert_eq!(queued.len(), 1);
    assert_eq!(
        IngestionMessage::from_json(&queued[0]).unwrap(),
        IngestionMessage::new(job_id, file_path)
    );
}

#[tokio::test]
async fn upload_without_file_field_is_rejected() {
    let app = test_app().await;
    let (status, body) = send(&app, upload("attachment", "repos.csv", "name,owner,stars\n")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("No file"));
    assert!(app.broker.pending_bodies(INGESTION_QUEUE).is_empty());
}

#[tokio::test]
async fn empty_upload_creates_no_job() {
    let app = test_app().await;
    let (status, _) = send(&app, upload("file", "repos.csv", "")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.jobs.get_job(JobId(1)).await.is_err());
}

#[tokio::test]
async fn upload_during_store_outage_is_unavailable() {
    let app = test_app().await;
    app.jobs.set_unavailable(true);
    let (status, _) = send(&app, upload("file", "repos.csv", "name,owner,stars\n")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(app.broker.pending_bodies(INGESTION_QUEUE).is_empty());
}

#[tokio::test]
async fn job_lookup_returns_record_or_404() {
    let app = test_app().await;
    let job = app.jobs.create_job("/tmp/a.csv").await.unwrap();

    let (status, body) = send(&app, get(&format!("/jobs/{}", job.id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], job.id.0);
    assert_eq!(body["filePath"], "/tmp/a.csv");
    assert_eq!(body["status"], "pending");

    let (status, body) = send(&app, get("/jobs/999")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("999"));
}

#[tokio::test]
async fn repos_are_paged_newest_first() {
    let app = test_app().await;
    for (name, stars) in [("a", 1), ("b", 2), ("c", 3)] {
        app.repos
            .insert(NewRepo {
                github_id: None,
                name: name.into(),
                owner: "o".into(),
                stars,
            })
            .await
            .unwrap();
    }

    let (status, body) = send(&app, get("/repos?limit=2&offset=0")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    let names: Vec<&str> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["c", "b"]);

    let (status, _) = send(&app, get("/repos?limit=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_reports_queue_connectivity() {
    let app = test_app().await;
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["queue"]["connected"], true);
    assert_eq!(body["queue"]["provider"], "memory");

    app.broker.set_reachable(false);
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["queue"]["connected"], false);
}

// ── WebSocket push ──────────────────────────────────────────────

async fn serve(app: &TestApp) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = build_router(app.state.clone());
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    addr
}

/// Client side of the WebSocket handshake over a plain TCP stream.
async fn ws_connect(addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET /ws HTTP/1.1\r\nHost: {addr}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        response.push(byte[0]);
    }
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 101"));
    stream
}

async fn wait_for_subscribers(hub: &SubscriberHub, expected: usize) {
    let settled = tokio::time::timeout(Duration::from_secs(5), async {
        while hub.subscriber_count() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(
        settled.is_ok(),
        "expected {expected} subscribers, hub has {}",
        hub.subscriber_count()
    );
}

#[tokio::test]
async fn socket_receives_job_outcome() {
    let app = test_app().await;
    let addr = serve(&app).await;
    let mut socket = ws_connect(addr).await;
    wait_for_subscribers(&app.state.hub, 1).await;

    let event = JobEvent::from(NotificationMessage::JobCompleted { job_id: JobId(5) });
    assert_eq!(app.state.hub.send(&event).await.unwrap(), 1);

    // Unmasked text frame with a short payload.
    let mut header = [0u8; 2];
    socket.read_exact(&mut header).await.unwrap();
    assert_eq!(header[0], 0x81);
    let mut payload = vec![0u8; (header[1] & 0x7f) as usize];
    socket.read_exact(&mut payload).await.unwrap();

    let frame: Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(
        frame,
        serde_json::json!({ "type": "jobCompleted", "data": { "jobId": 5, "status": "completed" } })
    );
}

#[tokio::test]
async fn closed_socket_releases_its_subscription() {
    let app = test_app().await;
    let addr = serve(&app).await;
    let mut socket = ws_connect(addr).await;
    wait_for_subscribers(&app.state.hub, 1).await;

    // Masked close frame, empty payload. No event is broadcast afterwards.
    socket.write_all(&[0x88, 0x80, 0x01, 0x02, 0x03, 0x04]).await.unwrap();
    wait_for_subscribers(&app.state.hub, 0).await;
}
