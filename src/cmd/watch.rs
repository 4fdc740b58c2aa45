//! `confmux watch`: print every change matching a pattern until
//! SIGTERM / Ctrl+C.
//!
//! Each event is one JSON line on stdout:
//! `{"kind":"UPDATE","key":"app.name","old_value":"foo","value":"bar"}`.

use std::sync::Arc;

use crate::cli::WatchArgs;
use crate::config::{Callback, ConfigEvent, ConfigManager};
use crate::error::Result;

pub async fn execute(manager: &ConfigManager, args: &WatchArgs) -> Result<()> {
    let callback: Callback = Arc::new(|event: &ConfigEvent| {
        println!("{}", event_line(event));
    });
    let id = manager.watch(&args.pattern, callback)?;

    let relaying = manager.relaying_adapters();
    if relaying.is_empty() {
        tracing::warn!("no source has watching enabled; no changes will be reported");
    } else {
        tracing::info!(
            pattern = %args.pattern,
            watch = %id,
            sources = %relaying.join(","),
            "watching for config changes"
        );
    }

    shutdown_signal().await;
    manager.unwatch(id);
    Ok(())
}

#[must_use]
pub fn event_line(event: &ConfigEvent) -> serde_json::Value {
    serde_json::json!({
        "kind": event.kind.to_string(),
        "key": event.key,
        "old_value": event.old_value,
        "value": event.value,
    })
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
