//! Shared integration-test harness: a mocked Kubernetes API server built on
//! `tower_test`, mirroring the pattern the upstream `kube` crate itself uses
//! in its own `mock_tests.rs`, plus fake `SessionRegistry`/`ClientGetter`
//! capability implementations standing in for the embedder.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use http::{Request, Response};
use kube::Client;
use kube::client::Body;

use kube_fault_stream::events::Notification;
use kube_fault_stream::kube_client::{ClientError, ClientGetter, ClientResult};
use kube_fault_stream::session::{SessionHandle, SessionRegistry, SessionResult};

pub type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;

/// Spins up a mocked `kube::Client` and returns it alongside the handle a
/// test drives to script responses, one per expected API call in order.
pub fn mock_kube_client() -> (Client, ApiServerHandle) {
    let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
    let client = Client::new(mock_service, "default");
    (client, handle)
}

/// Feeds `responses` to the mock server in order, one per request, same
/// shape as the `ApiServerVerifier` chain this pattern is grounded on.
pub fn spawn_scenario(mut handle: ApiServerHandle, responses: Vec<Response<Body>>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        for response in responses {
            let (_request, send) = handle.next_request().await.expect("mock server called more times than scripted");
            send.send_response(response);
        }
    })
}

pub fn json_response(body: serde_json::Value) -> Response<Body> {
    Response::builder().body(Body::from(serde_json::to_vec(&body).unwrap())).unwrap()
}

/// A watch response body: one JSON object per line, matching the wire format
/// `Api::watch` parses. An empty `lines` vec yields a zero-byte body, which
/// the client sees as an immediate end-of-stream (triggering reconnect).
pub fn lines_response(lines: Vec<serde_json::Value>) -> Response<Body> {
    let mut buf = Vec::new();
    for line in lines {
        buf.extend(serde_json::to_vec(&line).unwrap());
        buf.push(b'\n');
    }
    Response::builder().body(Body::from(buf)).unwrap()
}

pub fn not_found_response() -> Response<Body> {
    let status = serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": "pod not found",
        "reason": "NotFound",
        "code": 404,
    });
    Response::builder()
        .status(http::StatusCode::NOT_FOUND)
        .body(Body::from(serde_json::to_vec(&status).unwrap()))
        .unwrap()
}

pub fn event_list_json(resource_version: &str) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "EventList",
        "metadata": { "resourceVersion": resource_version },
        "items": [],
    })
}

pub fn sample_event_json(
    name: &str,
    namespace: &str,
    uid: &str,
    resource_version: &str,
    reason: &str,
    event_type: &str,
    pod_name: &str,
) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Event",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "uid": uid,
            "resourceVersion": resource_version,
        },
        "involvedObject": {
            "apiVersion": "v1",
            "kind": "Pod",
            "name": pod_name,
            "namespace": namespace,
            "uid": format!("{pod_name}-uid"),
        },
        "reason": reason,
        "message": format!("{reason} message"),
        "type": event_type,
        "count": 1,
        "firstTimestamp": "2026-01-01T00:00:00Z",
    })
}

pub fn watch_line(event_type: &str, object: serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "type": event_type, "object": object })
}

/// Polls `condition` until it's true or `timeout` elapses. Used instead of a
/// fixed sleep since notification delivery runs on a background consumer task.
pub async fn wait_for(condition: impl Fn() -> bool, timeout: Duration) {
    tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met within timeout");
}

/// A push destination that records every notification it receives.
pub struct RecordingSession {
    sent: Mutex<Vec<Notification>>,
    alive: AtomicBool,
}

impl RecordingSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            alive: AtomicBool::new(true),
        })
    }

    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionHandle for RecordingSession {
    async fn send(&self, notification: Notification) -> SessionResult<()> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeSessionRegistry {
    sessions: Mutex<HashMap<String, Arc<RecordingSession>>>,
}

impl FakeSessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, session_id: &str) -> Arc<RecordingSession> {
        let session = RecordingSession::new();
        self.sessions.lock().unwrap().insert(session_id.to_string(), session.clone());
        session
    }
}

#[async_trait]
impl SessionRegistry for FakeSessionRegistry {
    async fn get(&self, session_id: &str) -> Option<Arc<dyn SessionHandle>> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .filter(|session| session.is_alive())
            .map(|session| session.clone() as Arc<dyn SessionHandle>)
    }

    async fn live_session_ids(&self) -> Vec<String> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, session)| session.is_alive())
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Resolves every cluster id to the same pre-built mock client.
pub struct FakeClientGetter {
    client: Client,
}

impl FakeClientGetter {
    pub fn new(client: Client) -> Arc<Self> {
        Arc::new(Self { client })
    }
}

#[async_trait]
impl ClientGetter for FakeClientGetter {
    async fn get(&self, _cluster: &str) -> ClientResult<Client> {
        Ok(self.client.clone())
    }
}

/// Never resolves a client. Used to exercise the `ClientUnavailable` path
/// without standing up a mock server at all.
pub struct UnavailableClientGetter;

#[async_trait]
impl ClientGetter for UnavailableClientGetter {
    async fn get(&self, cluster: &str) -> ClientResult<Client> {
        Err(ClientError::UnknownCluster(cluster.to_string()))
    }
}
