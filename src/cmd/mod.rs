//! Subcommand dispatch and execution.
//!
//! The [`dispatch`] function routes the parsed CLI to the appropriate
//! subcommand handler: [`get`], [`dump`], [`set`], [`watch`], or
//! [`validate`]. Every handler except `validate` runs against a
//! [`ConfigManager`] built from the sources manifest, which is closed
//! once the handler returns.

pub mod dump;
pub mod get;
pub mod set;
pub mod validate;
pub mod watch;

use std::path::Path;

use crate::cli::{Cli, Commands};
use crate::config::manifest::{build_manager, load_manifest, resolve_manifest_path};
use crate::config::ConfigManager;
use crate::error::Result;
use crate::logging;

pub async fn dispatch(cli: Cli) -> Result<()> {
    let command = match cli.command {
        None => {
            print_welcome();
            return Ok(());
        }
        Some(Commands::Validate(ref args)) => return validate::execute(args).await,
        Some(command) => command,
    };

    logging::init(
        &cli.log_level,
        logging::resolve_format(cli.pretty, cli.json),
    );
    let manager = connect(cli.sources.as_deref()).await?;

    let result = match command {
        Commands::Get(ref args) => get::execute(&manager, args).await,
        Commands::Dump => dump::execute(&manager).await,
        Commands::Set(ref args) => set::execute(&manager, args).await,
        Commands::Watch(ref args) => watch::execute(&manager, args).await,
        // Handled before any source is contacted.
        Commands::Validate(_) => Ok(()),
    };

    let closed = manager.close().await;
    result.and(closed)
}

/// Load the sources manifest (explicit or auto-detected) and build a
/// manager from it.
pub async fn connect(sources: Option<&Path>) -> Result<ConfigManager> {
    let path = resolve_manifest_path(sources).await?;
    let manifest = load_manifest(&path).await?;
    tracing::debug!(path = %path.display(), "loaded sources manifest");
    build_manager(&manifest).await
}

fn print_welcome() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        "\n  confmux v{version} - multi-source configuration manager\n\n  \
         No command provided. To get started:\n\n    \
         confmux validate confmux.yaml     Check a sources manifest\n    \
         confmux dump                      Print the merged configuration\n    \
         confmux get app.name              Resolve one key\n    \
         confmux --help                    See all commands and options\n"
    );
}
