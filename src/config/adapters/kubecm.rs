//! Kubernetes ConfigMap adapter over the plain REST API.
//!
//! [`KubecmAdapter`] treats one entry of one ConfigMap (`data[data_key]`)
//! as a structured document in YAML, JSON or properties format. Writes
//! re-serialize the whole document and PUT the whole object back; the API
//! server's own `resourceVersion` check is the only concurrency guard.
//! Watching polls the object and only re-parses and diffs when its
//! `resourceVersion` moved.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Method, Request, StatusCode};
use k8s_openapi::api::core::v1::ConfigMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use super::http::{build_http_client, parse_uri, send, HttpClient, HttpResponse};
use super::{
    default_remote_interval_ms, default_timeout_ms, is_false, millis_or, spawn_poll_loop,
    PollHandle,
};
use crate::config::format::{self, Format};
use crate::config::snapshot::{flatten, lookup, set_dotted, ChangeFeed, Snapshot};
use crate::config::{Callback, ConfigAdapter, WatchId};
use crate::error::{ConfmuxError, Result};

pub const NAME: &str = "kubecm";

pub const IN_CLUSTER_API_SERVER: &str = "https://kubernetes.default.svc";
pub const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
pub const SERVICE_ACCOUNT_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

fn default_api_server() -> String {
    IN_CLUSTER_API_SERVER.to_string()
}

fn default_token_file() -> PathBuf {
    PathBuf::from(SERVICE_ACCOUNT_TOKEN)
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_data_key() -> String {
    "config.yaml".to_string()
}

const fn default_format() -> Format {
    Format::Yaml
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct KubecmAdapterConfig {
    #[serde(default = "default_api_server")]
    pub api_server: String,

    /// Bearer token. Takes precedence over `token_file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,

    /// PEM bundle trusted for the API server. Defaults to the service
    /// account CA when talking to the in-cluster API server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default)]
    pub config_map: String,

    #[serde(default = "default_data_key")]
    pub data_key: String,

    #[serde(default = "default_format")]
    pub format: Format,

    #[serde(default, skip_serializing_if = "is_false")]
    pub watch: bool,

    #[serde(default = "default_remote_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for KubecmAdapterConfig {
    fn default() -> Self {
        Self {
            api_server: default_api_server(),
            token: None,
            token_file: default_token_file(),
            ca_file: None,
            namespace: default_namespace(),
            config_map: String::new(),
            data_key: default_data_key(),
            format: default_format(),
            watch: false,
            interval_ms: default_remote_interval_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl KubecmAdapterConfig {
    #[must_use]
    pub fn for_config_map(config_map: impl Into<String>) -> Self {
        Self {
            config_map: config_map.into(),
            ..Self::default()
        }
    }

    /// Poll interval; zero means the default.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        millis_or(self.interval_ms, default_remote_interval_ms())
    }

    /// Per-request timeout; zero means the default.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        millis_or(self.timeout_ms, default_timeout_ms())
    }

    pub fn config_map_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.api_server).map_err(|e| {
            ConfmuxError::InvalidArgument(format!(
                "{NAME}: invalid api_server '{}': {e}",
                self.api_server
            ))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                ConfmuxError::InvalidArgument(format!(
                    "{NAME}: api_server '{}' cannot carry a path",
                    self.api_server
                ))
            })?
            .pop_if_empty()
            .extend(["api", "v1", "namespaces", &self.namespace, "configmaps", &self.config_map]);
        Ok(url)
    }

    fn effective_ca_file(&self) -> Option<&Path> {
        if let Some(ref path) = self.ca_file {
            return Some(path.as_path());
        }
        let in_cluster = Path::new(SERVICE_ACCOUNT_CA);
        (self.api_server == IN_CLUSTER_API_SERVER && in_cluster.is_file()).then_some(in_cluster)
    }
}

struct KubecmInner {
    url: Url,
    namespace: String,
    config_map: String,
    data_key: String,
    format: Format,
    token: Option<String>,
    token_file: PathBuf,
    timeout: Duration,
    client: HttpClient,
    feed: ChangeFeed,
    last_version: Mutex<Option<String>>,
}

impl KubecmInner {
    async fn bearer_token(&self) -> Result<String> {
        if let Some(ref token) = self.token {
            return Ok(token.clone());
        }
        match tokio::fs::read_to_string(&self.token_file).await {
            Ok(contents) if !contents.trim().is_empty() => Ok(contents.trim().to_string()),
            _ => Err(ConfmuxError::MissingCredentials {
                adapter: NAME.into(),
                token_file: self.token_file.clone(),
            }),
        }
    }

    async fn call(&self, method: Method, body: Bytes) -> Result<HttpResponse> {
        let token = self.bearer_token().await?;
        let mut builder = Request::builder()
            .method(method.clone())
            .uri(parse_uri(NAME, &self.url)?)
            .header(hyper::header::AUTHORIZATION, format!("Bearer {token}"))
            .header(hyper::header::ACCEPT, "application/json");
        if method == Method::PUT {
            builder = builder.header(hyper::header::CONTENT_TYPE, "application/json");
        }
        let request = builder.body(Full::new(body)).map_err(|e| {
            ConfmuxError::InvalidArgument(format!("{NAME}: cannot build request: {e}"))
        })?;
        send(&self.client, NAME, request, self.timeout).await
    }

    fn status_error(&self, status: StatusCode) -> ConfmuxError {
        ConfmuxError::HttpStatus {
            adapter: NAME.into(),
            status,
            url: self.url.to_string(),
        }
    }

    fn origin(&self) -> String {
        format!("configmap {}/{}[{}]", self.namespace, self.config_map, self.data_key)
    }

    async fn fetch(&self) -> Result<Option<ConfigMap>> {
        let response = self.call(Method::GET, Bytes::new()).await?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status.is_success() {
            return Err(self.status_error(response.status));
        }
        serde_json::from_slice(&response.body)
            .map(Some)
            .map_err(|e| ConfmuxError::parse(self.url.to_string(), e))
    }

    fn parse_blob(&self, config_map: &ConfigMap) -> Result<Map<String, Value>> {
        match config_map
            .data
            .as_ref()
            .and_then(|data| data.get(&self.data_key))
        {
            Some(blob) => format::parse(self.format, blob, &self.origin()),
            None => Ok(Map::new()),
        }
    }

    async fn data(&self) -> Result<Map<String, Value>> {
        match self.fetch().await? {
            Some(config_map) => self.parse_blob(&config_map),
            None => Ok(Map::new()),
        }
    }

    async fn update(&self, config_map: &ConfigMap) -> Result<()> {
        let body = serde_json::to_vec(config_map)
            .map_err(|e| ConfmuxError::parse(self.origin(), e))?;
        let response = self.call(Method::PUT, Bytes::from(body)).await?;
        if !response.status.is_success() {
            return Err(self.status_error(response.status));
        }
        Ok(())
    }

    fn version_changed(&self, version: Option<&String>) -> bool {
        let last = self
            .last_version
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        last.as_ref() != version || version.is_none()
    }

    fn record_version(&self, version: Option<String>) {
        *self
            .last_version
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = version;
    }

    /// Fetch the object and, if its resourceVersion moved, re-parse and
    /// publish. A missing ConfigMap publishes an empty snapshot, so its keys
    /// surface as deletions and a later creation as additions. Returns
    /// whether a new snapshot was published.
    async fn refresh(&self) -> Result<bool> {
        let Some(config_map) = self.fetch().await? else {
            self.feed.publish(Snapshot::new());
            self.record_version(None);
            return Ok(false);
        };
        let version = config_map.metadata.resource_version.clone();
        if !self.version_changed(version.as_ref()) {
            tracing::trace!(adapter = NAME, "configmap resourceVersion unchanged");
            return Ok(false);
        }
        let data = self.parse_blob(&config_map)?;
        self.feed.publish(flatten(&data));
        self.record_version(version);
        Ok(true)
    }

    async fn poll_once(&self) {
        if let Err(e) = self.refresh().await {
            tracing::warn!(adapter = NAME, error = %e, "configmap poll failed, skipping cycle");
        }
    }
}

pub struct KubecmAdapter {
    inner: Arc<KubecmInner>,
    config: KubecmAdapterConfig,
    poller: Option<PollHandle>,
    closed: AtomicBool,
}

impl KubecmAdapter {
    pub async fn new(config: KubecmAdapterConfig) -> Result<Self> {
        if config.config_map.trim().is_empty() {
            return Err(ConfmuxError::InvalidArgument(format!(
                "{NAME}: config_map name is required"
            )));
        }
        if config.namespace.trim().is_empty() {
            return Err(ConfmuxError::InvalidArgument(format!(
                "{NAME}: namespace cannot be empty"
            )));
        }

        let inner = Arc::new(KubecmInner {
            url: config.config_map_url()?,
            namespace: config.namespace.clone(),
            config_map: config.config_map.clone(),
            data_key: config.data_key.clone(),
            format: config.format,
            token: config.token.clone().filter(|t| !t.is_empty()),
            token_file: config.token_file.clone(),
            timeout: config.timeout(),
            client: build_http_client(config.effective_ca_file())?,
            feed: ChangeFeed::new(NAME),
            last_version: Mutex::new(None),
        });

        let poller = if config.watch {
            if let Err(e) = inner.refresh().await {
                tracing::warn!(adapter = NAME, error = %e, "initial configmap fetch failed, first successful poll reports every key as added");
            }
            let poll_inner = Arc::clone(&inner);
            Some(spawn_poll_loop(NAME, config.interval(), move || {
                let inner = Arc::clone(&poll_inner);
                async move { inner.poll_once().await }
            }))
        } else {
            None
        };

        tracing::debug!(
            adapter = NAME,
            url = %inner.url,
            data_key = %inner.data_key,
            format = %inner.format,
            watch = config.watch,
            "kubecm adapter ready"
        );

        Ok(Self {
            inner,
            config,
            poller,
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &KubecmAdapterConfig {
        &self.config
    }
}

#[async_trait]
impl ConfigAdapter for KubecmAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn available(&self) -> bool {
        match self.inner.call(Method::GET, Bytes::new()).await {
            Ok(response) => {
                response.status == StatusCode::OK || response.status == StatusCode::NOT_FOUND
            }
            Err(e) => {
                tracing::debug!(adapter = NAME, error = %e, "kubernetes availability check failed");
                false
            }
        }
    }

    async fn get(&self, pattern: &str) -> Result<Option<Value>> {
        let data = self.inner.data().await?;
        Ok(lookup(&data, pattern).cloned())
    }

    async fn data(&self) -> Result<Map<String, Value>> {
        self.inner.data().await
    }

    async fn set(&self, pattern: &str, value: Value) -> Result<()> {
        let mut config_map =
            self.inner
                .fetch()
                .await?
                .ok_or_else(|| ConfmuxError::ConfigMapNotFound {
                    namespace: self.inner.namespace.clone(),
                    name: self.inner.config_map.clone(),
                })?;

        let mut data = self.inner.parse_blob(&config_map)?;
        set_dotted(&mut data, pattern, value);
        let blob = format::serialize(self.inner.format, &data)?;
        config_map
            .data
            .get_or_insert_with(BTreeMap::new)
            .insert(self.inner.data_key.clone(), blob);

        self.inner.update(&config_map).await?;
        tracing::debug!(adapter = NAME, key = pattern, "configmap key written");
        Ok(())
    }

    fn watch(&self, pattern: &str, callback: Callback) -> Result<WatchId> {
        if !self.config.watch {
            return Err(ConfmuxError::WatchDisabled {
                adapter: NAME.into(),
            });
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(ConfmuxError::AdapterClosed {
                adapter: NAME.into(),
            });
        }
        Ok(self.inner.feed.watch(pattern, callback))
    }

    fn unwatch(&self, id: WatchId) -> bool {
        self.inner.feed.unwatch(id)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        if let Some(ref poller) = self.poller {
            poller.stop();
        }
        self.inner.feed.reset();
        self.inner.record_version(None);
        Ok(())
    }
}
