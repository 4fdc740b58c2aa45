//! Unified error types for confmux.
//!
//! Defines [`ConfmuxError`] (the main crate error enum), the coarse
//! [`ErrorKind`] taxonomy callers branch on, and [`ValidationError`] for
//! sources manifest validation failures. Error messages include
//! contextual hints to guide the user toward a fix.

use std::path::PathBuf;

pub type Result<T, E = ConfmuxError> = std::result::Result<T, E>;

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub source: String,
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "  source {}: {}: {}", self.source, self.field, self.message)?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, " ({suggestion})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

fn format_errors(errors: &[ValidationError]) -> String {
    use std::fmt::Write;
    let mut buf = String::new();
    for (i, e) in errors.iter().enumerate() {
        if i > 0 {
            buf.push('\n');
        }
        // write! to String is infallible (only fails on OOM which is unrecoverable)
        let _ = write!(buf, "{e}");
    }
    buf
}

fn format_close_errors(errors: &[(String, ConfmuxError)]) -> String {
    errors
        .iter()
        .map(|(name, e)| format!("{name}: {e}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Coarse classification of a [`ConfmuxError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Unavailable,
    Unsupported,
    InvalidArgument,
    Parse,
    Other,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfmuxError {
    #[error("No sources manifest found.\n\n  {hint}")]
    NoConfigSource { hint: String },

    #[error("Config file not found: {}", path.display())]
    ConfigFileNotFound { path: PathBuf },

    #[error("Config key '{key}' not found in any source")]
    KeyNotFound { key: String },

    #[error("Adapter '{name}' is not registered")]
    AdapterNotFound { name: String },

    #[error("ConfigMap {namespace}/{name} not found")]
    ConfigMapNotFound { namespace: String, name: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{adapter} backend unavailable: {source}")]
    Unavailable {
        adapter: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{adapter} backend returned status {status} for {url}")]
    HttpStatus {
        adapter: String,
        status: http::StatusCode,
        url: String,
    },

    #[error("{adapter}: no valid authentication token found (checked token and {})", token_file.display())]
    MissingCredentials { adapter: String, token_file: PathBuf },

    #[error("No config source is available")]
    NoSourceAvailable,

    #[error("{adapter} adapter does not support {operation}")]
    Unsupported {
        adapter: String,
        operation: &'static str,
    },

    #[error("{adapter} adapter was created with watching disabled")]
    WatchDisabled { adapter: String },

    #[error("{adapter} adapter is closed")]
    AdapterClosed { adapter: String },

    #[error("Config parse error in {origin}:\n  {source}")]
    Parse {
        origin: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Unsupported config format: '{0}'")]
    UnsupportedFormat(String),

    #[error("Errors occurred while closing adapters: {}", format_close_errors(.errors))]
    Close { errors: Vec<(String, ConfmuxError)> },

    #[error("Sources manifest validation failed:\n{}", format_errors(.errors))]
    ManifestValidation { errors: Vec<ValidationError> },

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl ConfmuxError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NoConfigSource { .. }
            | Self::ConfigFileNotFound { .. }
            | Self::KeyNotFound { .. }
            | Self::AdapterNotFound { .. }
            | Self::ConfigMapNotFound { .. } => ErrorKind::NotFound,
            Self::Unavailable { .. }
            | Self::HttpStatus { .. }
            | Self::MissingCredentials { .. }
            | Self::AdapterClosed { .. }
            | Self::NoSourceAvailable => ErrorKind::Unavailable,
            Self::Unsupported { .. } | Self::WatchDisabled { .. } => ErrorKind::Unsupported,
            Self::InvalidArgument(_) | Self::ManifestValidation { .. } => {
                ErrorKind::InvalidArgument
            }
            Self::Parse { .. } | Self::UnsupportedFormat(_) => ErrorKind::Parse,
            Self::Close { .. } | Self::Io(_) => ErrorKind::Other,
        }
    }

    pub(crate) fn unavailable(
        adapter: &str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Unavailable {
            adapter: adapter.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn parse(
        origin: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Parse {
            origin: origin.into(),
            source: source.into(),
        }
    }
}
