//! Opt-in process-wide manager.
//!
//! Nothing here initializes itself: call [`init`] once at startup with a
//! fully built [`ConfigManager`]. Until then every helper reports
//! [`ConfmuxError::NoSourceAvailable`] (or returns the default).

use std::sync::OnceLock;

use serde_json::Value;

use super::{Callback, ConfigManager, WatchId};
use crate::error::{ConfmuxError, Result};

static GLOBAL: OnceLock<ConfigManager> = OnceLock::new();

/// Install `manager` as the process-wide instance. Fails if one was
/// already installed.
pub fn init(manager: ConfigManager) -> Result<()> {
    GLOBAL.set(manager).map_err(|_| {
        ConfmuxError::InvalidArgument("global config manager already initialized".into())
    })
}

#[must_use]
pub fn manager() -> Option<&'static ConfigManager> {
    GLOBAL.get()
}

pub async fn get(pattern: &str) -> Result<Value> {
    manager()
        .ok_or(ConfmuxError::NoSourceAvailable)?
        .get(pattern)
        .await
}

pub async fn get_with_default(pattern: &str, default: Value) -> Value {
    match manager() {
        Some(manager) => manager.get_with_default(pattern, default).await,
        None => default,
    }
}

pub fn watch(pattern: &str, callback: Callback) -> Result<WatchId> {
    manager()
        .ok_or(ConfmuxError::NoSourceAvailable)?
        .watch(pattern, callback)
}

pub fn unwatch(id: WatchId) -> bool {
    manager().is_some_and(|manager| manager.unwatch(id))
}
