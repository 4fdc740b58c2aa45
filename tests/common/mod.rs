//! Shared fixtures: in-process mock Consul and Kubernetes API servers, an
//! in-memory adapter, and event collection helpers.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use confmux::config::snapshot::{flatten, lookup, set_dotted, ChangeFeed};
use confmux::config::{Callback, ConfigAdapter, ConfigEvent, WatchId};
use confmux::error::{ConfmuxError, Result};

pub const KUBE_TOKEN: &str = "test-token";

pub async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Callback that forwards every event into a channel.
pub fn collector() -> (Callback, mpsc::UnboundedReceiver<ConfigEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: Callback = Arc::new(move |event: &ConfigEvent| {
        let _ = tx.send(event.clone());
    });
    (callback, rx)
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<ConfigEvent>) -> ConfigEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for config event")
        .expect("event channel closed")
}

/// Assert nothing else arrives within `wait`.
pub async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<ConfigEvent>, wait: Duration) {
    tokio::time::sleep(wait).await;
    if let Ok(event) = rx.try_recv() {
        panic!("unexpected extra event: {event:?}");
    }
}

// -- Consul -----------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MockConsul {
    kv: Arc<Mutex<BTreeMap<String, String>>>,
    pub last_token: Arc<Mutex<Option<String>>>,
    pub last_dc: Arc<Mutex<Option<String>>>,
    /// While set, every endpoint answers 503 as an agent without a leader does.
    pub down: Arc<AtomicBool>,
    pub leader_hits: Arc<AtomicUsize>,
}

impl MockConsul {
    pub fn with(pairs: &[(&str, &str)]) -> Self {
        let mock = Self::default();
        for (key, value) in pairs {
            mock.put(key, value);
        }
        mock
    }

    pub fn put(&self, key: &str, value: &str) {
        self.kv
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn remove(&self, key: &str) {
        self.kv.lock().unwrap().remove(key);
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.kv.lock().unwrap().get(key).cloned()
    }

    pub async fn start(&self) -> SocketAddr {
        let router = Router::new()
            .route("/v1/kv/{*key}", get(consul_get).put(consul_put))
            .route("/v1/status/leader", get(consul_leader))
            .with_state(self.clone());
        serve(router).await
    }

    fn record(&self, headers: &HeaderMap, query: &HashMap<String, String>) {
        *self.last_token.lock().unwrap() = headers
            .get("X-Consul-Token")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        *self.last_dc.lock().unwrap() = query.get("dc").cloned();
    }
}

fn unavailable() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "No cluster leader").into_response()
}

async fn consul_leader(
    State(mock): State<MockConsul>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    mock.record(&headers, &query);
    mock.leader_hits.fetch_add(1, Ordering::SeqCst);
    if mock.down.load(Ordering::SeqCst) {
        return unavailable();
    }
    Json(Value::String("127.0.0.1:8300".into())).into_response()
}

async fn consul_get(
    State(mock): State<MockConsul>,
    Path(key): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    mock.record(&headers, &query);
    if mock.down.load(Ordering::SeqCst) {
        return unavailable();
    }
    let kv = mock.kv.lock().unwrap().clone();

    let pairs: Vec<Value> = if query.contains_key("recurse") {
        kv.iter()
            .filter(|(k, _)| k.starts_with(&key))
            .map(|(k, v)| json!({"Key": k, "Value": STANDARD.encode(v)}))
            .collect()
    } else {
        kv.get(&key)
            .map(|v| json!({"Key": key, "Value": STANDARD.encode(v)}))
            .into_iter()
            .collect()
    };

    if pairs.is_empty() {
        StatusCode::NOT_FOUND.into_response()
    } else {
        Json(Value::Array(pairs)).into_response()
    }
}

async fn consul_put(
    State(mock): State<MockConsul>,
    Path(key): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    mock.record(&headers, &query);
    if mock.down.load(Ordering::SeqCst) {
        return unavailable();
    }
    mock.put(&key, &String::from_utf8_lossy(&body));
    Json(Value::Bool(true)).into_response()
}

// -- Kubernetes ---------------------------------------------------------------

#[derive(Clone)]
pub struct MockKube {
    object: Arc<Mutex<Option<Value>>>,
    pub gets: Arc<AtomicUsize>,
}

impl MockKube {
    pub fn empty() -> Self {
        Self {
            object: Arc::new(Mutex::new(None)),
            gets: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_blob(namespace: &str, name: &str, data_key: &str, blob: &str) -> Self {
        let mock = Self::empty();
        mock.create(namespace, name, data_key, blob);
        mock
    }

    /// Store a fresh ConfigMap holding one data entry, as `kubectl create`
    /// would.
    pub fn create(&self, namespace: &str, name: &str, data_key: &str, blob: &str) {
        *self.object.lock().unwrap() = Some(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": name,
                "namespace": namespace,
                "resourceVersion": "1",
                "uid": "4c1e-mock"
            },
            "data": { data_key: blob }
        }));
    }

    pub fn blob(&self, data_key: &str) -> Option<String> {
        self.object.lock().unwrap().as_ref().and_then(|o| {
            o["data"][data_key].as_str().map(String::from)
        })
    }

    pub fn resource_version(&self) -> Option<String> {
        self.object.lock().unwrap().as_ref().and_then(|o| {
            o["metadata"]["resourceVersion"].as_str().map(String::from)
        })
    }

    pub fn object(&self) -> Option<Value> {
        self.object.lock().unwrap().clone()
    }

    /// Replace one data entry and bump the resourceVersion, as an external
    /// `kubectl apply` would.
    pub fn replace_blob(&self, data_key: &str, blob: &str) {
        let mut guard = self.object.lock().unwrap();
        let object = guard.as_mut().expect("no configmap stored");
        object["data"][data_key] = Value::String(blob.to_string());
        bump_version(object);
    }

    pub async fn start(&self) -> SocketAddr {
        let router = Router::new()
            .route(
                "/api/v1/namespaces/{namespace}/configmaps/{name}",
                get(kube_get).put(kube_put),
            )
            .with_state(self.clone());
        serve(router).await
    }
}

fn bump_version(object: &mut Value) {
    let next = object["metadata"]["resourceVersion"]
        .as_str()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    object["metadata"]["resourceVersion"] = Value::String(next.to_string());
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {KUBE_TOKEN}"))
}

fn addressed(object: &Value, namespace: &str, name: &str) -> bool {
    object["metadata"]["namespace"] == namespace && object["metadata"]["name"] == name
}

fn not_found(name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "kind": "Status",
            "status": "Failure",
            "reason": "NotFound",
            "message": format!("configmaps \"{name}\" not found"),
            "code": 404
        })),
    )
        .into_response()
}

async fn kube_get(
    State(mock): State<MockKube>,
    Path((namespace, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    mock.gets.fetch_add(1, Ordering::SeqCst);
    match mock.object.lock().unwrap().clone() {
        Some(object) if addressed(&object, &namespace, &name) => Json(object).into_response(),
        _ => not_found(&name),
    }
}

async fn kube_put(
    State(mock): State<MockKube>,
    Path((namespace, name)): Path<(String, String)>,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut guard = mock.object.lock().unwrap();
    match guard.as_ref() {
        Some(current) if addressed(current, &namespace, &name) => {
            if body["metadata"]["resourceVersion"] != current["metadata"]["resourceVersion"] {
                return StatusCode::CONFLICT.into_response();
            }
            bump_version(&mut body);
            *guard = Some(body.clone());
            Json(body).into_response()
        }
        _ => not_found(&name),
    }
}

// -- In-memory adapter --------------------------------------------------------

/// Adapter over a map held in memory, with switchable availability and
/// call counters.
pub struct MemoryAdapter {
    name: String,
    data: RwLock<Map<String, Value>>,
    available: AtomicBool,
    fail_close: bool,
    feed: ChangeFeed,
    pub gets: AtomicUsize,
    pub closes: AtomicUsize,
}

impl MemoryAdapter {
    pub fn new(name: &str, data: Value) -> Arc<Self> {
        let Value::Object(data) = data else {
            panic!("memory adapter data must be an object");
        };
        let feed = ChangeFeed::new("memory");
        feed.seed(flatten(&data));
        Arc::new(Self {
            name: name.to_string(),
            data: RwLock::new(data),
            available: AtomicBool::new(true),
            fail_close: false,
            feed,
            gets: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        })
    }

    pub fn failing_close(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            data: RwLock::new(Map::new()),
            available: AtomicBool::new(true),
            fail_close: true,
            feed: ChangeFeed::new("memory"),
            gets: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        })
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Swap in new data and notify watchers, like a poll cycle would.
    pub fn replace(&self, data: Value) {
        let Value::Object(data) = data else {
            panic!("memory adapter data must be an object");
        };
        *self.data.write().unwrap() = data.clone();
        self.feed.publish(flatten(&data));
    }
}

#[async_trait]
impl ConfigAdapter for MemoryAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn get(&self, pattern: &str) -> Result<Option<Value>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(ConfmuxError::NoSourceAvailable);
        }
        Ok(lookup(&self.data.read().unwrap(), pattern).cloned())
    }

    async fn data(&self) -> Result<Map<String, Value>> {
        Ok(self.data.read().unwrap().clone())
    }

    async fn set(&self, pattern: &str, value: Value) -> Result<()> {
        set_dotted(&mut self.data.write().unwrap(), pattern, value);
        Ok(())
    }

    fn watch(&self, pattern: &str, callback: Callback) -> Result<WatchId> {
        Ok(self.feed.watch(pattern, callback))
    }

    fn unwatch(&self, id: WatchId) -> bool {
        self.feed.unwatch(id)
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.feed.reset();
        if self.fail_close {
            return Err(ConfmuxError::InvalidArgument(format!(
                "{} refused to close",
                self.name
            )));
        }
        Ok(())
    }
}
