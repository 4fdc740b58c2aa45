//! The process-wide manager is strictly opt-in. Kept in its own test binary
//! because initialization cannot be undone.

mod common;

use serde_json::json;

use common::{collector, next_event, MemoryAdapter};
use confmux::config::{global, ConfigManager};
use confmux::error::ConfmuxError;

#[tokio::test]
async fn global_manager_lifecycle() {
    assert!(global::manager().is_none());
    assert!(matches!(
        global::get("app.name").await,
        Err(ConfmuxError::NoSourceAvailable)
    ));
    assert_eq!(
        global::get_with_default("app.name", json!("dflt")).await,
        json!("dflt")
    );
    let (callback, _rx) = collector();
    assert!(global::watch("*", callback).is_err());

    let source = MemoryAdapter::new("mem", json!({"app": {"name": "global"}}));
    let manager = ConfigManager::new();
    manager.register_adapter("mem", source.clone()).unwrap();
    manager.set_primary("mem").unwrap();
    global::init(manager).unwrap();

    assert!(global::init(ConfigManager::new()).is_err());
    assert_eq!(global::get("app.name").await.unwrap(), json!("global"));
    assert_eq!(
        global::get_with_default("app.missing", json!(0)).await,
        json!(0)
    );

    let (callback, mut rx) = collector();
    let id = global::watch("app", callback).unwrap();
    source.replace(json!({"app": {"name": "changed"}}));
    assert_eq!(next_event(&mut rx).await.value, Some(json!("changed")));
    assert!(global::unwatch(id));
}
