//! Sources manifest: a file that declares named adapters and how the
//! manager ranks them.
//!
//! ```yaml
//! primary: remote
//! fallback: [local]
//! sources:
//!   remote:
//!     kind: consul
//!     address: consul.internal:8500
//!     prefix: myapp/
//!     watch: true
//!   local:
//!     kind: file
//!     path: config/app.yaml
//! ```
//!
//! [`load_manifest`] parses and validates such a file; [`build_manager`]
//! turns it into a ready [`ConfigManager`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::adapters::consul::{ConsulAdapter, ConsulAdapterConfig};
use super::adapters::file::{FileAdapter, FileAdapterConfig};
use super::adapters::kubecm::{KubecmAdapter, KubecmAdapterConfig};
use super::format::{self, Format};
use super::validation::validate;
use super::{ConfigAdapter, ConfigManager};
use crate::error::{ConfmuxError, Result};

/// File names tried, in order, when no manifest path is given.
pub const MANIFEST_CANDIDATES: &[&str] = &[
    "confmux.yaml",
    "confmux.yml",
    "confmux.json",
    "confmux.toml",
];

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback: Vec<String>,

    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    File(FileAdapterConfig),
    Consul(ConsulAdapterConfig),
    Kubecm(KubecmAdapterConfig),
}

impl SourceConfig {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Consul(_) => "consul",
            Self::Kubecm(_) => "kubecm",
        }
    }

    pub async fn build(&self) -> Result<Arc<dyn ConfigAdapter>> {
        let adapter: Arc<dyn ConfigAdapter> = match self {
            Self::File(config) => Arc::new(FileAdapter::new(config.clone()).await?),
            Self::Consul(config) => Arc::new(ConsulAdapter::new(config.clone()).await?),
            Self::Kubecm(config) => Arc::new(KubecmAdapter::new(config.clone()).await?),
        };
        Ok(adapter)
    }
}

impl Manifest {
    #[must_use]
    pub fn total_watching(&self) -> usize {
        self.sources
            .values()
            .filter(|source| match source {
                SourceConfig::File(c) => c.watch,
                SourceConfig::Consul(c) => c.watch,
                SourceConfig::Kubecm(c) => c.watch,
            })
            .count()
    }
}

/// Parse a manifest from text without validating it.
pub fn parse_manifest_str(format: Format, content: &str, origin: &str) -> Result<Manifest> {
    format::decode(format, content, origin)
}

/// Read, parse and validate a manifest file.
pub async fn load_manifest(path: &Path) -> Result<Manifest> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfmuxError::ConfigFileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            ConfmuxError::Io(e)
        }
    })?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let manifest = parse_manifest_str(
        Format::from_extension(ext)?,
        &content,
        &path.display().to_string(),
    )?;

    if let Err(errors) = validate(&manifest) {
        return Err(ConfmuxError::ManifestValidation { errors });
    }
    Ok(manifest)
}

/// The explicit path if given, otherwise the first manifest candidate found
/// in the current directory.
pub async fn resolve_manifest_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    for name in MANIFEST_CANDIDATES {
        let path = PathBuf::from(name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::info!(path = %path.display(), "auto-detected sources manifest");
            return Ok(path);
        }
    }

    Err(ConfmuxError::NoConfigSource {
        hint: format!(
            "Provide --sources <file> or create one of: {}.",
            MANIFEST_CANDIDATES.join(", ")
        ),
    })
}

/// Construct every declared adapter and register it, then apply the
/// primary and fallback ranking.
pub async fn build_manager(manifest: &Manifest) -> Result<ConfigManager> {
    let manager = ConfigManager::new();

    for (name, source) in &manifest.sources {
        let adapter = source.build().await.map_err(|e| {
            tracing::error!(source = %name, kind = source.kind(), error = %e, "failed to build config source");
            e
        })?;
        manager.register_adapter(name, adapter)?;
        tracing::debug!(source = %name, kind = source.kind(), "registered config source");
    }

    if let Some(ref primary) = manifest.primary {
        manager.set_primary(primary)?;
    }
    if !manifest.fallback.is_empty() {
        manager.set_fallback(manifest.fallback.iter().cloned())?;
    }

    tracing::info!(
        sources = manifest.sources.len(),
        watching = manifest.total_watching(),
        primary = manifest.primary.as_deref().unwrap_or("(none)"),
        "config manager ready"
    );
    Ok(manager)
}
