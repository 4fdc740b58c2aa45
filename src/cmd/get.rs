//! `confmux get`: resolve one key through the primary and fallback sources.

use serde_json::Value;

use crate::cli::{parse_value, GetArgs};
use crate::config::ConfigManager;
use crate::error::{ConfmuxError, Result};

pub async fn execute(manager: &ConfigManager, args: &GetArgs) -> Result<()> {
    let value = match args.default {
        Some(ref default) => {
            manager
                .get_with_default(&args.key, parse_value(default))
                .await
        }
        None => manager.get(&args.key).await?,
    };
    println!("{}", render(&value)?);
    Ok(())
}

/// Strings print bare so the output composes in shell scripts; everything
/// else prints as pretty JSON.
pub fn render(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => serde_json::to_string_pretty(other)
            .map_err(|e| ConfmuxError::parse("<stdout>", e)),
    }
}
