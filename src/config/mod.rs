//! Multi-source configuration: the adapter contract, change events, and
//! the manager that composes adapters.
//!
//! Defines the [`ConfigAdapter`] trait for pluggable config backends,
//! the [`ConfigEvent`] / [`EventType`] pair emitted when a flattened key
//! changes, and the [`Callback`] type subscribers register. Submodules
//! provide the concrete adapters, the [`ConfigManager`] with its cache and
//! primary/fallback resolution, snapshot diffing, pattern matching, and
//! the sources manifest used to build a manager from a file.

pub mod adapters;
pub mod format;
pub mod global;
pub mod manager;
pub mod manifest;
pub mod snapshot;
pub mod validation;
pub mod watch;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;

pub use manager::ConfigManager;
pub use watch::WatchId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Add,
    Update,
    Delete,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Add => "ADD",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        })
    }
}

/// One change to a single flattened configuration key.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigEvent {
    pub key: String,
    /// `None` for [`EventType::Delete`].
    pub value: Option<Value>,
    /// `None` for [`EventType::Add`].
    pub old_value: Option<Value>,
    pub kind: EventType,
}

/// Subscriber callback. Invoked on its own task; panics are caught and logged.
pub type Callback = Arc<dyn Fn(&ConfigEvent) + Send + Sync>;

// async_trait is required here because ConfigAdapter is used as Arc<dyn ConfigAdapter>
// and native async fn in traits does not support dyn dispatch.
#[async_trait]
pub trait ConfigAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Health check bounded by the adapter's own timeout. Never errors.
    async fn available(&self) -> bool;

    /// Resolve one dotted key. An absent key is `Ok(None)`.
    async fn get(&self, pattern: &str) -> Result<Option<Value>>;

    /// The full current configuration as a nested map.
    async fn data(&self) -> Result<Map<String, Value>>;

    async fn set(&self, pattern: &str, value: Value) -> Result<()>;

    fn watch(&self, pattern: &str, callback: Callback) -> Result<WatchId>;

    fn unwatch(&self, id: WatchId) -> bool;

    /// Stop background polling and drop all watchers. Idempotent.
    async fn close(&self) -> Result<()>;
}
