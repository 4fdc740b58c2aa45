//! `confmux set`: write one key through the primary source.

use crate::cli::{parse_value, SetArgs};
use crate::config::ConfigManager;
use crate::error::Result;

pub async fn execute(manager: &ConfigManager, args: &SetArgs) -> Result<()> {
    manager.set(&args.key, parse_value(&args.value)).await?;
    println!(
        "\u{2713} {} written to {}",
        args.key,
        manager.primary().unwrap_or_default()
    );
    Ok(())
}
