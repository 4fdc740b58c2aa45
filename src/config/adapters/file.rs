//! Local file adapter with SHA-256 change detection.
//!
//! [`FileAdapter`] resolves its file once at construction (an explicit
//! path, or `file_name` searched in `.`, `config` and `manifest/config`),
//! parses it eagerly and, when watching, re-reads it on every poll tick.
//! A changed digest triggers a re-parse, a snapshot swap and one event per
//! changed key. File-backed configuration is read-only at runtime.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{is_false, millis_or, spawn_poll_loop, PollHandle};
use crate::config::format::{self, sha256_hex, Format};
use crate::config::snapshot::{flatten, lookup, read, write, ChangeFeed};
use crate::config::{Callback, ConfigAdapter, WatchId};
use crate::error::{ConfmuxError, Result};

pub const NAME: &str = "file";

/// Directories searched, in order, when no explicit path is configured.
pub const SEARCH_DIRS: &[&str] = &[".", "config", "manifest/config"];

fn default_file_name() -> String {
    "config.yaml".to_string()
}

const fn default_interval_ms() -> u64 {
    3_000
}

fn is_default_file_name(v: &str) -> bool {
    v == default_file_name()
}

fn is_default_interval(v: &u64) -> bool {
    *v == default_interval_ms()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileAdapterConfig {
    /// Explicit file path. When unset, `file_name` is searched for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(
        default = "default_file_name",
        skip_serializing_if = "is_default_file_name"
    )]
    pub file_name: String,

    /// Overrides the format inferred from the file extension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<Format>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub watch: bool,

    #[serde(
        default = "default_interval_ms",
        skip_serializing_if = "is_default_interval"
    )]
    pub interval_ms: u64,
}

impl Default for FileAdapterConfig {
    fn default() -> Self {
        Self {
            path: None,
            file_name: default_file_name(),
            format: None,
            watch: false,
            interval_ms: default_interval_ms(),
        }
    }
}

impl FileAdapterConfig {
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Poll interval; zero means the default.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        millis_or(self.interval_ms, default_interval_ms())
    }

    /// The file this config points at, if it exists.
    #[must_use]
    pub fn resolve_path(&self) -> Option<PathBuf> {
        if let Some(ref path) = self.path {
            return path.is_file().then(|| path.clone());
        }
        SEARCH_DIRS
            .iter()
            .map(|dir| Path::new(dir).join(&self.file_name))
            .find(|candidate| candidate.is_file())
    }
}

struct Document {
    data: Map<String, Value>,
    digest: String,
}

struct FileInner {
    path: PathBuf,
    format: Format,
    document: RwLock<Document>,
    feed: ChangeFeed,
}

impl FileInner {
    async fn read_content(&self) -> Result<String> {
        read_file(&self.path).await
    }

    fn parse(&self, content: &str) -> Result<Map<String, Value>> {
        format::parse(self.format, content, &self.path.display().to_string())
    }

    /// Re-read the file; returns the new data if the digest changed.
    async fn reload(&self) -> Result<Option<Map<String, Value>>> {
        let content = self.read_content().await?;
        let digest = sha256_hex(content.as_bytes());
        let unchanged = read(&self.document).digest == digest;
        if unchanged {
            return Ok(None);
        }
        let data = self.parse(&content)?;
        *write(&self.document) = Document {
            data: data.clone(),
            digest,
        };
        Ok(Some(data))
    }

    async fn poll_once(&self) {
        match self.reload().await {
            Ok(Some(data)) => {
                self.feed.publish(flatten(&data));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    adapter = NAME,
                    path = %self.path.display(),
                    error = %e,
                    "config file poll failed, skipping cycle"
                );
            }
        }
    }
}

pub struct FileAdapter {
    inner: Arc<FileInner>,
    config: FileAdapterConfig,
    poller: Option<PollHandle>,
    closed: AtomicBool,
}

impl FileAdapter {
    pub async fn new(config: FileAdapterConfig) -> Result<Self> {
        let path = config
            .resolve_path()
            .ok_or_else(|| ConfmuxError::ConfigFileNotFound {
                path: config
                    .path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(&config.file_name)),
            })?;

        let format = match config.format {
            Some(format) => format,
            None => Format::from_extension(
                path.extension().and_then(|e| e.to_str()).unwrap_or(""),
            )?,
        };

        let content = read_file(&path).await?;
        let data = format::parse(format, &content, &path.display().to_string())?;

        let feed = ChangeFeed::new(NAME);
        feed.seed(flatten(&data));

        let inner = Arc::new(FileInner {
            path,
            format,
            document: RwLock::new(Document {
                data,
                digest: sha256_hex(content.as_bytes()),
            }),
            feed,
        });

        let poller = config.watch.then(|| {
            let poll_inner = Arc::clone(&inner);
            spawn_poll_loop(NAME, config.interval(), move || {
                let inner = Arc::clone(&poll_inner);
                async move { inner.poll_once().await }
            })
        });

        tracing::debug!(
            adapter = NAME,
            path = %inner.path.display(),
            format = %inner.format,
            watch = config.watch,
            "file adapter ready"
        );

        Ok(Self {
            inner,
            config,
            poller,
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    #[must_use]
    pub const fn config(&self) -> &FileAdapterConfig {
        &self.config
    }

    /// Current document. Without a poll loop to keep it fresh, the file is
    /// re-read on every call.
    async fn current(&self) -> Result<Map<String, Value>> {
        if self.poller.is_none() {
            if let Some(data) = self.inner.reload().await? {
                return Ok(data);
            }
        }
        Ok(read(&self.inner.document).data.clone())
    }
}

async fn read_file(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfmuxError::ConfigFileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            ConfmuxError::Io(e)
        }
    })
}

#[async_trait]
impl ConfigAdapter for FileAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn available(&self) -> bool {
        tokio::fs::try_exists(&self.inner.path)
            .await
            .unwrap_or(false)
    }

    async fn get(&self, pattern: &str) -> Result<Option<Value>> {
        let data = self.current().await?;
        Ok(lookup(&data, pattern).cloned())
    }

    async fn data(&self) -> Result<Map<String, Value>> {
        self.current().await
    }

    async fn set(&self, _pattern: &str, _value: Value) -> Result<()> {
        Err(ConfmuxError::Unsupported {
            adapter: NAME.into(),
            operation: "set",
        })
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = FileAdapterConfig::default();
        assert_eq!(config.file_name, "config.yaml");
        assert_eq!(config.interval(), Duration::from_secs(3));
        assert!(!config.watch);
    }

    #[cfg(feature = "json")]
    #[test]
    fn config_deserializes_with_defaults() {
        let config: FileAdapterConfig =
            serde_json::from_str(r#"{"path": "/etc/app.yaml", "watch": true}"#).unwrap();
        assert_eq!(config.path, Some(PathBuf::from("/etc/app.yaml")));
        assert!(config.watch);
        assert_eq!(config.interval_ms, 3_000);
    }

    #[cfg(feature = "json")]
    #[test]
    fn config_rejects_unknown_fields() {
        let result = serde_json::from_str::<FileAdapterConfig>(r#"{"paht": "x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn resolve_missing_explicit_path() {
        let config = FileAdapterConfig::with_path("/definitely/not/here.yaml");
        assert!(config.resolve_path().is_none());
    }
}
