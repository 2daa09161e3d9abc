//! Session controller driven against an in-process sandbox service over real
//! HTTP: provisioning, debounced patching, log polling, keepalive teardown.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;

use marquee::config::Timings;
use marquee::controller::{PreviewStatus, SessionController};
use marquee::workspace::{FileSnapshot, ProjectTree, build_snapshot};
use sandbox_sdk::{SandboxClient, SandboxConfig};

#[derive(Default)]
struct SessionRec {
    alive: bool,
    patches: Vec<(String, String)>,
    fail_patches: usize,
    log_lines: Vec<String>,
    log_cursor: usize,
}

#[derive(Default)]
struct ServiceState {
    start_calls: usize,
    ping_calls: usize,
    next_id: usize,
    sessions: HashMap<String, SessionRec>,
}

type Shared = Arc<AsyncMutex<ServiceState>>;

const LOG_PAGE: usize = 2;

async fn start_session(State(state): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let mut state = state.lock().await;
    state.start_calls += 1;
    state.next_id += 1;
    let id = format!("sess-{}", state.next_id);
    let files = body["files"].as_object().map(|map| map.len()).unwrap_or(0);
    state.sessions.insert(
        id.clone(),
        SessionRec {
            alive: true,
            log_lines: vec![format!("installed {files} files"), "dev server ready".into()],
            ..SessionRec::default()
        },
    );
    Json(json!({
        "sessionId": id,
        "status": "running",
        "previewUrl": format!("https://preview.local/{id}"),
        "createdAt": 1_700_000_000_000u64,
    }))
}

async fn patch_file(
    Path(id): Path<String>,
    State(state): State<Shared>,
    Json(body): Json<Value>,
) -> StatusCode {
    let mut state = state.lock().await;
    let Some(session) = state.sessions.get_mut(&id) else {
        return StatusCode::NOT_FOUND;
    };
    let path = body["path"].as_str().unwrap_or_default().to_string();
    let content = body["content"].as_str().unwrap_or_default().to_string();
    session.patches.push((path, content));
    if session.fail_patches > 0 {
        session.fail_patches -= 1;
        return StatusCode::BAD_GATEWAY;
    }
    StatusCode::OK
}

async fn fetch_logs(
    Path(id): Path<String>,
    State(state): State<Shared>,
) -> Result<Json<Value>, StatusCode> {
    let mut state = state.lock().await;
    let Some(session) = state.sessions.get_mut(&id) else {
        return Err(StatusCode::NOT_FOUND);
    };
    let start = session.log_cursor;
    let end = (start + LOG_PAGE).min(session.log_lines.len());
    session.log_cursor = end;
    Ok(Json(json!({
        "lines": session.log_lines[start..end].to_vec(),
        "hasMore": end < session.log_lines.len(),
    })))
}

async fn ping_session(
    Path(id): Path<String>,
    State(state): State<Shared>,
) -> Result<Json<Value>, StatusCode> {
    let mut state = state.lock().await;
    state.ping_calls += 1;
    match state.sessions.get(&id) {
        Some(session) if session.alive => Ok(Json(json!({ "status": "alive" }))),
        Some(_) => Ok(Json(json!({ "status": "dead" }))),
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn stop_session(Path(id): Path<String>, State(state): State<Shared>) -> StatusCode {
    let mut state = state.lock().await;
    if state.sessions.remove(&id).is_some() {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn spawn_service() -> (Shared, SocketAddr) {
    let shared: Shared = Arc::new(AsyncMutex::new(ServiceState::default()));
    let router = Router::new()
        .route("/session", post(start_session))
        .route("/session/:id/file", post(patch_file))
        .route("/session/:id/logs", get(fetch_logs))
        .route("/session/:id/ping", post(ping_session))
        .route("/session/:id/stop", post(stop_session))
        .with_state(shared.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (shared, addr)
}

fn fast_timings() -> Timings {
    Timings {
        debounce: Duration::from_millis(100),
        keepalive_interval: Duration::from_millis(300),
        log_poll_interval: Duration::from_millis(200),
        runtime_start_timeout: Duration::from_secs(5),
        bundler_timeout: Duration::from_secs(2),
        repromote_cooldown: Duration::from_secs(1),
        start_retry_backoff: Duration::from_millis(50),
    }
}

fn controller_for(addr: SocketAddr) -> SessionController {
    let config = SandboxConfig::new(format!("http://{addr}")).unwrap();
    let client = SandboxClient::new(config).unwrap();
    SessionController::new(client, "proj-roundtrip", fast_timings(), 100)
}

fn sample_snapshot() -> FileSnapshot {
    build_snapshot(&ProjectTree::new())
}

#[tokio::test]
async fn start_patch_and_logs_round_trip() {
    let (shared, addr) = spawn_service().await;
    let controller = controller_for(addr);

    let handle = controller.start(&sample_snapshot()).await.unwrap();
    assert_eq!(handle.id, "sess-1");
    assert_eq!(
        handle.preview_url.as_ref().map(|url| url.as_str()),
        Some("https://preview.local/sess-1")
    );
    assert_eq!(controller.snapshot().status, PreviewStatus::Running);

    // Rapid saves to one path collapse into a single wire patch.
    controller.sync_file("/src/App.jsx", "v1");
    controller.sync_file("/src/App.jsx", "v2");
    controller.sync_file("/src/App.jsx", "v3");
    sleep(Duration::from_millis(400)).await;

    {
        let state = shared.lock().await;
        let session = &state.sessions["sess-1"];
        assert_eq!(session.patches.len(), 1);
        assert_eq!(
            session.patches[0],
            ("/src/App.jsx".to_string(), "v3".to_string())
        );
    }
    assert_eq!(controller.snapshot().status, PreviewStatus::Running);

    // The poller pages through the scripted backlog (page size 2).
    sleep(Duration::from_millis(500)).await;
    let logs = controller.logs();
    assert!(logs.iter().any(|line| line == "dev server ready"), "{logs:?}");

    controller.stop();
    sleep(Duration::from_millis(200)).await;
    assert!(shared.lock().await.sessions.is_empty());
}

#[tokio::test]
async fn patch_failure_is_healed_by_one_resync() {
    let (shared, addr) = spawn_service().await;
    let controller = controller_for(addr);
    let snapshot = sample_snapshot();
    controller.start(&snapshot).await.unwrap();

    shared
        .lock()
        .await
        .sessions
        .get_mut("sess-1")
        .unwrap()
        .fail_patches = 1;

    controller.sync_file("/src/App.jsx", "broken");
    sleep(Duration::from_millis(600)).await;

    {
        let state = shared.lock().await;
        let session = &state.sessions["sess-1"];
        // One failed patch, then the full contents re-uploaded once.
        assert_eq!(session.patches.len(), 1 + snapshot.len() + 1);
        assert!(
            session
                .patches
                .iter()
                .any(|(path, content)| path == "/src/App.jsx" && content == "broken")
        );
        assert!(session.patches.iter().any(|(path, _)| path == "/index.html"));
    }
    let state = controller.snapshot();
    assert_eq!(state.status, PreviewStatus::Running);
    assert!(state.last_error.is_none());
}

#[tokio::test]
async fn keepalive_detects_a_dead_session() {
    let (shared, addr) = spawn_service().await;
    let controller = controller_for(addr);
    controller.start(&sample_snapshot()).await.unwrap();

    shared
        .lock()
        .await
        .sessions
        .get_mut("sess-1")
        .unwrap()
        .alive = false;
    sleep(Duration::from_millis(700)).await;

    let state = controller.snapshot();
    assert_eq!(state.status, PreviewStatus::Error);
    assert!(state.session.is_none());
    assert!(state.last_error.is_some());

    // With the session gone, pings stop too.
    let pinged = shared.lock().await.ping_calls;
    sleep(Duration::from_millis(700)).await;
    assert_eq!(shared.lock().await.ping_calls, pinged);
}

#[tokio::test]
async fn concurrent_starts_provision_once() {
    let (shared, addr) = spawn_service().await;
    let controller = controller_for(addr);
    let snapshot = sample_snapshot();

    let (a, b) = tokio::join!(controller.start(&snapshot), controller.start(&snapshot));
    assert_eq!(a.unwrap().id, b.unwrap().id);
    assert_eq!(shared.lock().await.start_calls, 1);
}

#[tokio::test]
async fn stop_cancels_pending_work() {
    let (shared, addr) = spawn_service().await;
    let controller = controller_for(addr);
    controller.start(&sample_snapshot()).await.unwrap();

    controller.sync_file("/src/App.jsx", "never shipped");
    controller.stop();
    sleep(Duration::from_millis(400)).await;

    let state = shared.lock().await;
    assert!(state.sessions.is_empty(), "remote stop must have landed");
    assert_eq!(controller.snapshot().status, PreviewStatus::Idle);
}
