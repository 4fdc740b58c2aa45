//! Flattened snapshots and the before/after diff every adapter shares.
//!
//! A [`Snapshot`] maps dotted keys (`app.db.host`) to leaf values. Adapters
//! build a fresh one per poll and hand it to a [`ChangeFeed`], which swaps
//! it in under its lock, diffs it against the previous snapshot and
//! dispatches one [`ConfigEvent`] per changed key to matching watchers.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};

use super::watch::{dispatch, WatcherRegistry};
use super::{Callback, ConfigEvent, EventType, WatchId};

pub type Snapshot = BTreeMap<String, Value>;

#[must_use]
pub fn flatten(data: &Map<String, Value>) -> Snapshot {
    let mut out = Snapshot::new();
    flatten_into(data, "", &mut out);
    out
}

fn flatten_into(data: &Map<String, Value>, prefix: &str, out: &mut Snapshot) {
    for (key, value) in data {
        let full_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(nested) => flatten_into(nested, &full_key, out),
            other => {
                out.insert(full_key, other.clone());
            }
        }
    }
}

/// Resolve a dotted path against a nested map. A literal top-level key
/// containing dots wins over nested traversal.
#[must_use]
pub fn lookup<'a>(data: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    if let Some(value) = data.get(path) {
        return Some(value);
    }
    let mut parts = path.split('.');
    let mut current = data.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Insert `value` at the path given by `segments`, creating (or replacing
/// non-object values with) intermediate maps as needed.
pub fn insert_path<'s>(
    data: &mut Map<String, Value>,
    segments: impl IntoIterator<Item = &'s str>,
    value: Value,
) {
    let segments: Vec<&str> = segments.into_iter().collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = data;
    for part in parents {
        let entry = current
            .entry((*part).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(nested) = entry else {
            return;
        };
        current = nested;
    }
    current.insert((*last).to_string(), value);
}

pub fn set_dotted(data: &mut Map<String, Value>, path: &str, value: Value) {
    insert_path(data, path.split('.'), value);
}

/// Fill keys missing from `target` with values from `fallback`, recursing
/// into maps present on both sides. Existing leaves in `target` always win.
pub fn merge_missing(target: &mut Map<String, Value>, fallback: Map<String, Value>) {
    for (key, value) in fallback {
        match (target.get_mut(&key), value) {
            (None, value) => {
                target.insert(key, value);
            }
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_missing(existing, incoming);
            }
            (Some(_), _) => {}
        }
    }
}

/// `null`, `""`, `[]` and `{}` count as "no answer" during resolution.
#[must_use]
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Render a value as text: strings unquoted, everything else as JSON.
#[must_use]
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Values are equal when they render to the same text, so `1` and `"1"`
/// coming from differently typed sources do not count as an update.
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    a == b || render(a) == render(b)
}

#[must_use]
pub fn diff(old: &Snapshot, new: &Snapshot) -> Vec<ConfigEvent> {
    let mut events = Vec::new();

    for (key, old_value) in old {
        match new.get(key) {
            None => events.push(ConfigEvent {
                key: key.clone(),
                value: None,
                old_value: Some(old_value.clone()),
                kind: EventType::Delete,
            }),
            Some(new_value) if !values_equal(old_value, new_value) => events.push(ConfigEvent {
                key: key.clone(),
                value: Some(new_value.clone()),
                old_value: Some(old_value.clone()),
                kind: EventType::Update,
            }),
            Some(_) => {}
        }
    }

    for (key, new_value) in new {
        if !old.contains_key(key) {
            events.push(ConfigEvent {
                key: key.clone(),
                value: Some(new_value.clone()),
                old_value: None,
                kind: EventType::Add,
            });
        }
    }

    events
}

/// Per-adapter snapshot plus watcher table.
///
/// The two locks are never held at the same time: the snapshot is swapped
/// first, then watchers are read while dispatching.
pub struct ChangeFeed {
    origin: &'static str,
    snapshot: RwLock<Option<Snapshot>>,
    watchers: RwLock<WatcherRegistry>,
}

impl ChangeFeed {
    #[must_use]
    pub fn new(origin: &'static str) -> Self {
        Self {
            origin,
            snapshot: RwLock::new(None),
            watchers: RwLock::new(WatcherRegistry::new()),
        }
    }

    pub fn seed(&self, snapshot: Snapshot) {
        *write(&self.snapshot) = Some(snapshot);
    }

    #[must_use]
    pub fn has_baseline(&self) -> bool {
        read(&self.snapshot).is_some()
    }

    /// Replace the snapshot and notify watchers of every changed key.
    /// Without a seeded baseline the previous state is empty, so every key
    /// of the first snapshot is reported as added. Returns the number of
    /// change events.
    pub fn publish(&self, new: Snapshot) -> usize {
        let previous = write(&self.snapshot).replace(new.clone());
        if previous.is_none() {
            tracing::debug!(origin = self.origin, keys = new.len(), "no baseline, diffing against empty snapshot");
        }
        let previous = previous.unwrap_or_default();

        let events = diff(&previous, &new);
        if events.is_empty() {
            return 0;
        }

        let deliveries: Vec<(Arc<ConfigEvent>, Vec<Callback>)> = {
            let watchers = read(&self.watchers);
            events
                .into_iter()
                .map(|event| {
                    let callbacks = watchers.matching(&event.key);
                    (Arc::new(event), callbacks)
                })
                .collect()
        };

        let count = deliveries.len();
        tracing::info!(origin = self.origin, changes = count, "config change detected");
        for (event, callbacks) in deliveries {
            tracing::debug!(origin = self.origin, key = %event.key, kind = %event.kind, "config key changed");
            dispatch(self.origin, callbacks, &event);
        }
        count
    }

    pub fn watch(&self, pattern: &str, callback: Callback) -> WatchId {
        write(&self.watchers).insert(pattern, callback)
    }

    pub fn unwatch(&self, id: WatchId) -> bool {
        write(&self.watchers).remove(id)
    }

    pub fn reset(&self) {
        write(&self.watchers).clear();
        *write(&self.snapshot) = None;
    }
}

// A poisoned lock only means a previous holder panicked mid-update of plain
// data; the data is still the last fully written value.
pub(crate) fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn flatten_nested_maps() {
        let data = obj(json!({"app": {"name": "x", "db": {"port": 5432}}, "debug": true}));
        let flat = flatten(&data);
        assert_eq!(flat.len(), 3);
        assert_eq!(flat["app.name"], json!("x"));
        assert_eq!(flat["app.db.port"], json!(5432));
        assert_eq!(flat["debug"], json!(true));
    }

    #[test]
    fn lookup_dotted_and_literal_keys() {
        let data = obj(json!({"app": {"name": "x"}, "a.b": 1}));
        assert_eq!(lookup(&data, "app.name"), Some(&json!("x")));
        assert_eq!(lookup(&data, "app"), Some(&json!({"name": "x"})));
        assert_eq!(lookup(&data, "a.b"), Some(&json!(1)));
        assert_eq!(lookup(&data, "app.missing"), None);
        assert_eq!(lookup(&data, "app.name.deeper"), None);
    }

    #[test]
    fn set_dotted_creates_and_replaces_parents() {
        let mut data = obj(json!({"app": "scalar"}));
        set_dotted(&mut data, "app.name", json!("x"));
        set_dotted(&mut data, "db.host", json!("h"));
        assert_eq!(Value::Object(data), json!({"app": {"name": "x"}, "db": {"host": "h"}}));
    }

    #[test]
    fn merge_keeps_target_leaves() {
        let mut primary = obj(json!({"app": {"name": "p", "env": "prod"}}));
        let fallback = obj(json!({"app": {"name": "f", "timeout": 30}, "cache": {"port": 6379}}));
        merge_missing(&mut primary, fallback);
        assert_eq!(
            Value::Object(primary),
            json!({"app": {"name": "p", "env": "prod", "timeout": 30}, "cache": {"port": 6379}})
        );
    }

    #[test]
    fn empty_values() {
        assert!(is_empty_value(&Value::Null));
        assert!(is_empty_value(&json!("")));
        assert!(is_empty_value(&json!([])));
        assert!(is_empty_value(&json!({})));
        assert!(!is_empty_value(&json!(0)));
        assert!(!is_empty_value(&json!(false)));
        assert!(!is_empty_value(&json!("x")));
    }

    #[test]
    fn diff_reports_add_update_delete_only() {
        let old = flatten(&obj(json!({"a": 1, "b": "same", "c": "gone"})));
        let new = flatten(&obj(json!({"a": 2, "b": "same", "d": "new"})));
        let events = diff(&old, &new);
        assert_eq!(events.len(), 3);

        let find = |key: &str| events.iter().find(|e| e.key == key).unwrap();
        assert_eq!(find("a").kind, EventType::Update);
        assert_eq!(find("a").old_value, Some(json!(1)));
        assert_eq!(find("a").value, Some(json!(2)));
        assert_eq!(find("c").kind, EventType::Delete);
        assert_eq!(find("c").value, None);
        assert_eq!(find("d").kind, EventType::Add);
        assert_eq!(find("d").old_value, None);
        assert!(events.iter().all(|e| e.key != "b"));
    }

    #[test]
    fn diff_ignores_type_only_changes() {
        let old = flatten(&obj(json!({"port": 8080})));
        let new = flatten(&obj(json!({"port": "8080"})));
        assert!(diff(&old, &new).is_empty());
    }

    #[tokio::test]
    async fn feed_without_seed_reports_first_snapshot_as_added() {
        let feed = ChangeFeed::new("test");
        assert!(!feed.has_baseline());
        assert_eq!(feed.publish(flatten(&obj(json!({"a": 1})))), 1);
        assert!(feed.has_baseline());
        assert_eq!(feed.publish(flatten(&obj(json!({"a": 2})))), 1);
        assert_eq!(feed.publish(flatten(&obj(json!({"a": 2})))), 0);
    }

    #[tokio::test]
    async fn feed_delivers_to_matching_watchers() {
        let feed = ChangeFeed::new("test");
        feed.seed(flatten(&obj(json!({"app": {"name": "foo"}, "db": {"host": "a"}}))));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        feed.watch(
            "app.*",
            Arc::new(move |e: &ConfigEvent| {
                let _ = tx.send(e.clone());
            }),
        );

        feed.publish(flatten(&obj(json!({"app": {"name": "bar"}, "db": {"host": "b"}}))));

        let event = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.key, "app.name");
        assert_eq!(event.kind, EventType::Update);
        assert_eq!(event.old_value, Some(json!("foo")));
        assert_eq!(event.value, Some(json!("bar")));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
