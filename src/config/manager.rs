//! The composition point application code talks to.
//!
//! [`ConfigManager`] owns a registry of named adapters, a primary name and
//! an ordered fallback list, a key → value cache, and its own watcher
//! table. Reads go cache → primary → fallbacks; the first non-empty answer
//! is cached. Each adapter gets at most one relay subscription (pattern
//! `*`) that invalidates the cache and re-dispatches events to manager
//! watchers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use serde_json::{Map, Value};

use super::snapshot::{is_empty_value, merge_missing, read, write};
use super::watch::{dispatch, WatcherRegistry};
use super::{Callback, ConfigAdapter, ConfigEvent, WatchId};
use crate::error::{ConfmuxError, Result};

const ORIGIN: &str = "manager";

#[derive(Default)]
struct Registry {
    adapters: HashMap<String, Arc<dyn ConfigAdapter>>,
    primary: Option<String>,
    fallback: Vec<String>,
    /// Relay subscription installed on each adapter, by adapter name.
    relays: HashMap<String, WatchId>,
}

impl Registry {
    /// Resolution order: primary, then fallbacks. With neither configured,
    /// every registered adapter in name order.
    fn resolution_order(&self) -> Vec<(String, Arc<dyn ConfigAdapter>)> {
        let mut names: Vec<&String> = self.primary.iter().collect();
        for name in &self.fallback {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        if names.is_empty() {
            names = self.adapters.keys().collect();
            names.sort();
        }
        names
            .into_iter()
            .filter_map(|name| {
                self.adapters
                    .get(name)
                    .map(|adapter| (name.clone(), Arc::clone(adapter)))
            })
            .collect()
    }
}

#[derive(Default)]
struct Cache {
    entries: HashMap<String, Value>,
    /// Bumped on every invalidation so a read that started before it does
    /// not store a stale answer.
    generation: u64,
}

impl Cache {
    fn invalidate(&mut self, key: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|cached, _| !touches(cached, key));
        self.generation += 1;
        before - self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.generation += 1;
    }
}

/// Whether a cached entry for `cached` may be stale after `changed` moved:
/// the same key, a dotted ancestor, or a dotted descendant.
fn touches(cached: &str, changed: &str) -> bool {
    fn nested(outer: &str, inner: &str) -> bool {
        inner
            .strip_prefix(outer)
            .is_some_and(|rest| rest.starts_with('.'))
    }
    cached == changed || nested(cached, changed) || nested(changed, cached)
}

struct ManagerInner {
    state: RwLock<Registry>,
    cache: RwLock<Cache>,
    watchers: RwLock<WatcherRegistry>,
}

impl ManagerInner {
    fn on_event(&self, adapter: &str, event: &ConfigEvent) {
        let evicted = write(&self.cache).invalidate(&event.key);
        tracing::debug!(
            adapter,
            key = %event.key,
            kind = %event.kind,
            evicted,
            "relaying config change"
        );

        let callbacks = read(&self.watchers).matching(&event.key);
        if !callbacks.is_empty() {
            dispatch(ORIGIN, callbacks, &Arc::new(event.clone()));
        }
    }
}

/// Cached, multi-source configuration reader. Cheap to clone; clones share
/// state.
#[derive(Clone)]
pub struct ConfigManager {
    inner: Arc<ManagerInner>,
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = read(&self.inner.state);
        let mut names: Vec<&String> = state.adapters.keys().collect();
        names.sort();
        f.debug_struct("ConfigManager")
            .field("adapters", &names)
            .field("primary", &state.primary)
            .field("fallback", &state.fallback)
            .finish_non_exhaustive()
    }
}

impl ConfigManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                state: RwLock::new(Registry::default()),
                cache: RwLock::new(Cache::default()),
                watchers: RwLock::new(WatcherRegistry::new()),
            }),
        }
    }

    /// Store `adapter` under `name`, replacing any adapter already there.
    pub fn register_adapter(&self, name: &str, adapter: Arc<dyn ConfigAdapter>) -> Result<()> {
        if name.trim().is_empty() {
            return Err(ConfmuxError::InvalidArgument(
                "adapter name cannot be empty".into(),
            ));
        }

        let relaying = !read(&self.inner.watchers).is_empty();
        {
            let mut state = write(&self.inner.state);
            if let Some(previous) = state.adapters.insert(name.to_string(), adapter) {
                if let Some(relay) = state.relays.remove(name) {
                    previous.unwatch(relay);
                }
                tracing::debug!(adapter = name, "replaced registered adapter");
            }
            if relaying {
                self.install_relay(&mut state, name);
            }
        }
        write(&self.inner.cache).clear();
        Ok(())
    }

    pub fn set_primary(&self, name: &str) -> Result<()> {
        {
            let mut state = write(&self.inner.state);
            if !state.adapters.contains_key(name) {
                return Err(ConfmuxError::AdapterNotFound { name: name.into() });
            }
            state.primary = Some(name.to_string());
        }
        write(&self.inner.cache).clear();
        Ok(())
    }

    pub fn set_fallback<I, S>(&self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        {
            let mut state = write(&self.inner.state);
            if let Some(missing) = names.iter().find(|n| !state.adapters.contains_key(*n)) {
                return Err(ConfmuxError::AdapterNotFound {
                    name: missing.clone(),
                });
            }
            state.fallback = names;
        }
        write(&self.inner.cache).clear();
        Ok(())
    }

    #[must_use]
    pub fn adapter(&self, name: &str) -> Option<Arc<dyn ConfigAdapter>> {
        read(&self.inner.state).adapters.get(name).cloned()
    }

    #[must_use]
    pub fn adapter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.inner.state).adapters.keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn primary(&self) -> Option<String> {
        read(&self.inner.state).primary.clone()
    }

    #[must_use]
    pub fn fallback(&self) -> Vec<String> {
        read(&self.inner.state).fallback.clone()
    }

    /// Adapters currently relaying change events to this manager.
    #[must_use]
    pub fn relaying_adapters(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.inner.state).relays.keys().cloned().collect();
        names.sort();
        names
    }

    fn sources(&self) -> Vec<(String, Arc<dyn ConfigAdapter>)> {
        read(&self.inner.state).resolution_order()
    }

    /// Resolve `pattern`: cache, then primary, then fallbacks in order.
    /// Per-source failures move on to the next source.
    pub async fn get(&self, pattern: &str) -> Result<Value> {
        let generation = {
            let cache = read(&self.inner.cache);
            if let Some(value) = cache.entries.get(pattern) {
                tracing::debug!(key = pattern, "config cache hit");
                return Ok(value.clone());
            }
            cache.generation
        };
        tracing::debug!(key = pattern, "config cache miss");

        for (name, adapter) in self.sources() {
            if !adapter.available().await {
                tracing::debug!(adapter = %name, key = pattern, "source unavailable, trying next");
                continue;
            }
            match adapter.get(pattern).await {
                Ok(Some(value)) if !is_empty_value(&value) => {
                    let mut cache = write(&self.inner.cache);
                    if cache.generation == generation {
                        cache.entries.insert(pattern.to_string(), value.clone());
                    }
                    return Ok(value);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(adapter = %name, key = pattern, error = %e, "source read failed, trying next");
                }
            }
        }

        Err(ConfmuxError::KeyNotFound {
            key: pattern.to_string(),
        })
    }

    /// Like [`get`](Self::get), substituting `default` for any failure or
    /// empty result.
    pub async fn get_with_default(&self, pattern: &str, default: Value) -> Value {
        self.get(pattern).await.unwrap_or(default)
    }

    /// Every available source's data merged; the primary's leaves win and
    /// fallbacks only fill gaps.
    pub async fn data(&self) -> Result<Map<String, Value>> {
        let mut merged: Option<Map<String, Value>> = None;

        for (name, adapter) in self.sources() {
            if !adapter.available().await {
                tracing::debug!(adapter = %name, "source unavailable, skipping");
                continue;
            }
            match adapter.data().await {
                Ok(data) => match merged {
                    Some(ref mut target) => merge_missing(target, data),
                    None => merged = Some(data),
                },
                Err(e) => {
                    tracing::warn!(adapter = %name, error = %e, "source data read failed, skipping");
                }
            }
        }

        merged.ok_or(ConfmuxError::NoSourceAvailable)
    }

    /// Write through the primary adapter. Errors are returned as-is.
    pub async fn set(&self, pattern: &str, value: Value) -> Result<()> {
        let (name, adapter) = {
            let state = read(&self.inner.state);
            let name = state
                .primary
                .clone()
                .ok_or(ConfmuxError::NoSourceAvailable)?;
            let adapter = state
                .adapters
                .get(&name)
                .cloned()
                .ok_or_else(|| ConfmuxError::AdapterNotFound { name: name.clone() })?;
            (name, adapter)
        };

        adapter.set(pattern, value).await?;
        write(&self.inner.cache).invalidate(pattern);
        tracing::debug!(adapter = %name, key = pattern, "config key written");
        Ok(())
    }

    /// Register `callback` for keys matching `pattern` across every
    /// registered adapter.
    pub fn watch(&self, pattern: &str, callback: Callback) -> Result<WatchId> {
        let id = write(&self.inner.watchers).insert(pattern, callback);

        let mut state = write(&self.inner.state);
        let names: Vec<String> = state.adapters.keys().cloned().collect();
        for name in names {
            self.install_relay(&mut state, &name);
        }
        Ok(id)
    }

    /// Remove one manager watcher. When the last one goes, the adapter
    /// relays are torn down too.
    pub fn unwatch(&self, id: WatchId) -> bool {
        let (removed, now_empty) = {
            let mut watchers = write(&self.inner.watchers);
            let removed = watchers.remove(id);
            (removed, watchers.is_empty())
        };

        if removed && now_empty {
            let mut state = write(&self.inner.state);
            let relays: Vec<(String, WatchId)> = state.relays.drain().collect();
            for (name, relay) in relays {
                if let Some(adapter) = state.adapters.get(&name) {
                    adapter.unwatch(relay);
                }
            }
        }
        removed
    }

    fn install_relay(&self, state: &mut Registry, name: &str) {
        if state.relays.contains_key(name) {
            return;
        }
        let Some(adapter) = state.adapters.get(name) else {
            return;
        };

        let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        let adapter_name = name.to_string();
        let relay: Callback = Arc::new(move |event: &ConfigEvent| {
            if let Some(inner) = weak.upgrade() {
                inner.on_event(&adapter_name, event);
            }
        });

        match adapter.watch("*", relay) {
            Ok(id) => {
                state.relays.insert(name.to_string(), id);
            }
            Err(e) => {
                tracing::debug!(adapter = name, error = %e, "adapter does not relay changes");
            }
        }
    }

    /// Close every adapter and clear all state. Individual failures are
    /// collected into one [`ConfmuxError::Close`].
    pub async fn close(&self) -> Result<()> {
        let adapters: Vec<(String, Arc<dyn ConfigAdapter>)> = {
            let mut state = write(&self.inner.state);
            state.relays.clear();
            state.primary = None;
            state.fallback.clear();
            let mut adapters: Vec<_> = state.adapters.drain().collect();
            adapters.sort_by(|a, b| a.0.cmp(&b.0));
            adapters
        };
        write(&self.inner.cache).clear();
        write(&self.inner.watchers).clear();

        let mut errors = Vec::new();
        for (name, adapter) in adapters {
            if let Err(e) = adapter.close().await {
                tracing::warn!(adapter = %name, error = %e, "adapter close failed");
                errors.push((name, e));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfmuxError::Close { errors })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touches_covers_ancestors_and_descendants() {
        assert!(touches("app.name", "app.name"));
        assert!(touches("app", "app.name"));
        assert!(touches("app.db.host", "app.db"));
        assert!(!touches("application", "app"));
        assert!(!touches("app.name", "app.names"));
    }

    #[test]
    fn invalidate_bumps_generation() {
        let mut cache = Cache::default();
        cache.entries.insert("app".into(), Value::Null);
        cache.entries.insert("app.name".into(), Value::Null);
        cache.entries.insert("db.host".into(), Value::Null);

        assert_eq!(cache.invalidate("app.name"), 2);
        assert_eq!(cache.generation, 1);
        assert!(cache.entries.contains_key("db.host"));
    }

    #[test]
    fn register_rejects_empty_name() {
        struct Never;

        #[async_trait::async_trait]
        impl ConfigAdapter for Never {
            fn name(&self) -> &str {
                "never"
            }
            async fn available(&self) -> bool {
                false
            }
            async fn get(&self, _: &str) -> Result<Option<Value>> {
                Ok(None)
            }
            async fn data(&self) -> Result<Map<String, Value>> {
                Ok(Map::new())
            }
            async fn set(&self, _: &str, _: Value) -> Result<()> {
                Ok(())
            }
            fn watch(&self, _: &str, _: Callback) -> Result<WatchId> {
                Err(ConfmuxError::WatchDisabled {
                    adapter: "never".into(),
                })
            }
            fn unwatch(&self, _: WatchId) -> bool {
                false
            }
            async fn close(&self) -> Result<()> {
                Ok(())
            }
        }

        let manager = ConfigManager::new();
        let err = manager.register_adapter("  ", Arc::new(Never)).unwrap_err();
        assert!(matches!(err, ConfmuxError::InvalidArgument(_)));

        manager.register_adapter("never", Arc::new(Never)).unwrap();
        assert!(matches!(
            manager.set_primary("missing"),
            Err(ConfmuxError::AdapterNotFound { .. })
        ));
        assert!(matches!(
            manager.set_fallback(["never", "ghost"]),
            Err(ConfmuxError::AdapterNotFound { name }) if name == "ghost"
        ));
        assert_eq!(manager.adapter_names(), vec!["never".to_string()]);
    }
}
