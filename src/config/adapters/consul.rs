//! Consul-style HTTP key/value adapter.
//!
//! [`ConsulAdapter`] scopes every key under a prefix (default `config/`).
//! Dotted keys map to KV paths by replacing `.` with `/`, so `app.name`
//! reads `config/app/name`. Values are base64 in the KV API and are decoded
//! as JSON when possible, raw text otherwise. Watching re-fetches the whole
//! prefix on every tick and diffs the flattened result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Method, Request, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use super::http::{build_http_client, parse_uri, send, HttpClient, HttpResponse};
use super::{
    default_remote_interval_ms, default_timeout_ms, is_false, millis_or, spawn_poll_loop,
    PollHandle,
};
use crate::config::snapshot::{flatten, insert_path, ChangeFeed};
use crate::config::{Callback, ConfigAdapter, WatchId};
use crate::error::{ConfmuxError, Result};

pub const NAME: &str = "consul";

fn default_address() -> String {
    "127.0.0.1:8500".to_string()
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_prefix() -> String {
    "config/".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConsulAdapterConfig {
    /// `host:port`, or a full base URL including the scheme.
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default = "default_scheme")]
    pub scheme: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_prefix")]
    pub prefix: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub watch: bool,

    #[serde(default = "default_remote_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ConsulAdapterConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            scheme: default_scheme(),
            datacenter: None,
            token: None,
            prefix: default_prefix(),
            watch: false,
            interval_ms: default_remote_interval_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ConsulAdapterConfig {
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

    pub fn base_url(&self) -> Result<Url> {
        let raw = if self.address.contains("://") {
            self.address.clone()
        } else {
            format!("{}://{}", self.scheme, self.address)
        };
        Url::parse(&raw).map_err(|e| {
            ConfmuxError::InvalidArgument(format!("{NAME}: invalid address '{raw}': {e}"))
        })
    }

    /// The prefix with exactly one trailing `/` (or empty).
    #[must_use]
    pub fn normalized_prefix(&self) -> String {
        let trimmed = self.prefix.trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("{trimmed}/")
        }
    }
}

#[derive(Debug, Deserialize)]
struct KvPair {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value", default)]
    value: Option<String>,
}

struct ConsulInner {
    base: Url,
    prefix: String,
    datacenter: Option<String>,
    token: Option<String>,
    timeout: Duration,
    client: HttpClient,
    feed: ChangeFeed,
}

impl ConsulInner {
    fn kv_key(&self, pattern: &str) -> String {
        if !self.prefix.is_empty() && pattern.starts_with(&self.prefix) {
            return pattern.to_string();
        }
        format!("{}{}", self.prefix, pattern.replace('.', "/"))
    }

    fn kv_url(&self, key: &str, recurse: bool) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ConfmuxError::InvalidArgument(format!(
                    "{NAME}: address '{}' cannot carry a path",
                    self.base
                ))
            })?
            .pop_if_empty()
            .push("v1")
            .push("kv")
            .extend(key.split('/'));
        {
            let mut query = url.query_pairs_mut();
            if recurse {
                query.append_pair("recurse", "true");
            }
            if let Some(ref dc) = self.datacenter {
                query.append_pair("dc", dc);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }

    /// Raft leader endpoint, answered by any healthy agent regardless of
    /// the KV contents or prefix.
    fn leader_url(&self) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ConfmuxError::InvalidArgument(format!(
                    "{NAME}: address '{}' cannot carry a path",
                    self.base
                ))
            })?
            .pop_if_empty()
            .extend(["v1", "status", "leader"]);
        if let Some(ref dc) = self.datacenter {
            url.query_pairs_mut().append_pair("dc", dc);
        }
        Ok(url)
    }

    async fn call(&self, method: Method, url: &Url, body: Bytes) -> Result<HttpResponse> {
        let mut builder = Request::builder()
            .method(method)
            .uri(parse_uri(NAME, url)?);
        if let Some(ref token) = self.token {
            builder = builder.header("X-Consul-Token", token);
        }
        let request = builder.body(Full::new(body)).map_err(|e| {
            ConfmuxError::InvalidArgument(format!("{NAME}: cannot build request for {url}: {e}"))
        })?;
        send(&self.client, NAME, request, self.timeout).await
    }

    async fn fetch_pairs(&self, url: &Url) -> Result<Option<Vec<KvPair>>> {
        let response = self.call(Method::GET, url, Bytes::new()).await?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status.is_success() {
            return Err(ConfmuxError::HttpStatus {
                adapter: NAME.into(),
                status: response.status,
                url: url.to_string(),
            });
        }
        serde_json::from_slice(&response.body)
            .map(Some)
            .map_err(|e| ConfmuxError::parse(url.to_string(), e))
    }

    async fn get(&self, pattern: &str) -> Result<Option<Value>> {
        let key = self.kv_key(pattern);
        let url = self.kv_url(&key, false)?;
        let Some(pairs) = self.fetch_pairs(&url).await? else {
            return Ok(None);
        };
        match pairs.into_iter().next().and_then(|pair| pair.value) {
            Some(encoded) => decode_value(&key, &encoded).map(Some),
            None => Ok(None),
        }
    }

    async fn data(&self) -> Result<Map<String, Value>> {
        let url = self.kv_url(&self.prefix, true)?;
        let mut data = Map::new();
        let Some(pairs) = self.fetch_pairs(&url).await? else {
            return Ok(data);
        };

        for pair in pairs {
            let relative = pair.key.strip_prefix(&self.prefix).unwrap_or(&pair.key);
            if relative.is_empty() || relative.ends_with('/') {
                continue;
            }
            let Some(encoded) = pair.value else {
                continue;
            };
            match decode_value(&pair.key, &encoded) {
                Ok(value) => insert_path(&mut data, relative.split('/'), value),
                Err(e) => {
                    tracing::warn!(adapter = NAME, key = %pair.key, error = %e, "skipping undecodable value");
                }
            }
        }
        Ok(data)
    }

    async fn poll_once(&self) {
        match self.data().await {
            Ok(data) => {
                self.feed.publish(flatten(&data));
            }
            Err(e) => {
                tracing::warn!(adapter = NAME, error = %e, "consul poll failed, skipping cycle");
            }
        }
    }
}

/// Base64-decode a KV value, then parse it as JSON or keep it as text.
fn decode_value(key: &str, encoded: &str) -> Result<Value> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ConfmuxError::parse(key, e))?;
    Ok(serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned())))
}

fn encode_body(value: &Value) -> Result<Bytes> {
    match value {
        Value::String(s) => Ok(Bytes::from(s.clone().into_bytes())),
        other => serde_json::to_vec(other)
            .map(Bytes::from)
            .map_err(|e| ConfmuxError::parse("<consul value>", e)),
    }
}

pub struct ConsulAdapter {
    inner: Arc<ConsulInner>,
    config: ConsulAdapterConfig,
    poller: Option<PollHandle>,
    closed: AtomicBool,
}

impl ConsulAdapter {
    /// Build the adapter. With watching enabled, the current prefix contents
    /// are fetched once as the diff baseline (best effort) before the poll
    /// loop starts.
    pub async fn new(config: ConsulAdapterConfig) -> Result<Self> {
        let inner = Arc::new(ConsulInner {
            base: config.base_url()?,
            prefix: config.normalized_prefix(),
            datacenter: config.datacenter.clone().filter(|dc| !dc.is_empty()),
            token: config.token.clone().filter(|t| !t.is_empty()),
            timeout: config.timeout(),
            client: build_http_client(None)?,
            feed: ChangeFeed::new(NAME),
        });

        let poller = if config.watch {
            match inner.data().await {
                Ok(data) => inner.feed.seed(flatten(&data)),
                Err(e) => {
                    tracing::warn!(adapter = NAME, error = %e, "initial consul fetch failed, first successful poll reports every key as added");
                }
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
            base = %inner.base,
            prefix = %inner.prefix,
            watch = config.watch,
            "consul adapter ready"
        );

        Ok(Self {
            inner,
            config,
            poller,
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &ConsulAdapterConfig {
        &self.config
    }
}

#[async_trait]
impl ConfigAdapter for ConsulAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn available(&self) -> bool {
        let Ok(url) = self.inner.leader_url() else {
            return false;
        };
        match self.inner.call(Method::GET, &url, Bytes::new()).await {
            Ok(response) => response.status == StatusCode::OK,
            Err(e) => {
                tracing::debug!(adapter = NAME, error = %e, "consul availability check failed");
                false
            }
        }
    }

    async fn get(&self, pattern: &str) -> Result<Option<Value>> {
        self.inner.get(pattern).await
    }

    async fn data(&self) -> Result<Map<String, Value>> {
        self.inner.data().await
    }

    async fn set(&self, pattern: &str, value: Value) -> Result<()> {
        let key = self.inner.kv_key(pattern);
        let url = self.inner.kv_url(&key, false)?;
        let response = self
            .inner
            .call(Method::PUT, &url, encode_body(&value)?)
            .await?;
        if !response.status.is_success() {
            return Err(ConfmuxError::HttpStatus {
                adapter: NAME.into(),
                status: response.status,
                url: url.to_string(),
            });
        }
        tracing::debug!(adapter = NAME, key = %key, "consul key written");
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
        Ok(())
    }
}
