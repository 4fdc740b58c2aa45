//! `confmux dump`: print the merged data of every available source.

use serde_json::Value;

use crate::config::ConfigManager;
use crate::error::{ConfmuxError, Result};

pub async fn execute(manager: &ConfigManager) -> Result<()> {
    let data = manager.data().await?;
    let json = serde_json::to_string_pretty(&Value::Object(data))
        .map_err(|e| ConfmuxError::parse("<stdout>", e))?;
    println!("{json}");
    Ok(())
}
