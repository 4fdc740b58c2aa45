//! Subscription patterns, watcher registries, and panic-isolated dispatch.
//!
//! A pattern is `*` (everything), an expression with one `*` (prefix and
//! suffix must both match), or a dotted key that matches itself and every
//! key nested below it. [`WatcherRegistry`] stores callbacks per pattern in
//! registration order; [`dispatch`] runs each callback on its own task.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{Callback, ConfigEvent};

static NEXT_WATCH_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned by a `watch` call, accepted by `unwatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(u64);

impl WatchId {
    fn next() -> Self {
        Self(NEXT_WATCH_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for WatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "watch#{}", self.0)
    }
}

#[must_use]
pub fn matches(pattern: &str, key: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if let Some((prefix, suffix)) = pattern.split_once('*') {
        if !suffix.contains('*') {
            // Prefix and suffix may overlap: `app.*.host` matches `app.host`.
            return key.starts_with(prefix) && key.ends_with(suffix);
        }
    }

    key == pattern
        || key
            .strip_prefix(pattern)
            .is_some_and(|rest| rest.starts_with('.'))
}

#[derive(Default)]
pub struct WatcherRegistry {
    entries: HashMap<String, Vec<(WatchId, Callback)>>,
}

impl WatcherRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pattern: &str, callback: Callback) -> WatchId {
        let id = WatchId::next();
        self.entries
            .entry(pattern.to_string())
            .or_default()
            .push((id, callback));
        id
    }

    pub fn remove(&mut self, id: WatchId) -> bool {
        let mut emptied = None;
        let mut removed = false;
        for (pattern, callbacks) in &mut self.entries {
            if let Some(pos) = callbacks.iter().position(|(cb_id, _)| *cb_id == id) {
                callbacks.remove(pos);
                removed = true;
                if callbacks.is_empty() {
                    emptied = Some(pattern.clone());
                }
                break;
            }
        }
        if let Some(pattern) = emptied {
            self.entries.remove(&pattern);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Callbacks whose pattern matches `key`, cloned out so the caller can
    /// release its lock before dispatching.
    #[must_use]
    pub fn matching(&self, key: &str) -> Vec<Callback> {
        self.entries
            .iter()
            .filter(|(pattern, _)| matches(pattern, key))
            .flat_map(|(_, callbacks)| callbacks.iter().map(|(_, cb)| Arc::clone(cb)))
            .collect()
    }
}

/// Run every callback on a freshly spawned task. A panicking callback is
/// logged and discarded without affecting the caller or other callbacks.
pub fn dispatch(origin: &str, callbacks: Vec<Callback>, event: &Arc<ConfigEvent>) {
    for callback in callbacks {
        let event = Arc::clone(event);
        let origin = origin.to_string();
        tokio::spawn(async move {
            if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(|| callback(&event)))
            {
                tracing::error!(
                    origin = %origin,
                    key = %event.key,
                    kind = %event.kind,
                    panic = %panic_message(payload.as_ref()),
                    "config watcher panicked"
                );
            }
        });
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".into()
    }
}
