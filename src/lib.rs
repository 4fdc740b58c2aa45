//! Confmux is a multi-source configuration manager.
//!
//! It reads configuration from pluggable adapters (a local file, a Consul
//! key/value prefix, a Kubernetes ConfigMap) and unifies them behind one
//! [`ConfigManager`](config::ConfigManager) that caches reads, resolves
//! keys through a primary source and ordered fallbacks, and fans out
//! change notifications detected by per-adapter poll loops to
//! pattern-matched callbacks.
//!
//! # Architecture
//!
//! - [`cli`] -- Command-line argument parsing with clap derive macros.
//! - [`cmd`] -- Subcommand dispatch and execution (get, dump, set, watch, validate).
//! - [`config`] -- The [`ConfigAdapter`](config::ConfigAdapter) trait, the
//!   concrete adapters, the manager, and the sources manifest.
//! - [`error`] -- Unified error types using `thiserror`.
//! - [`logging`] -- Structured tracing setup with JSON and pretty-print output.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `yaml` | YAML documents and manifests _(enabled by default)_ |
//! | `json` | JSON documents and manifests _(enabled by default)_ |
//! | `toml` | TOML documents and manifests |
//! | `file-backends` | All document formats |

// Binary crate: public functions are internal, not consumed by external users.
#![allow(clippy::missing_errors_doc)]

pub mod cli;
pub mod cmd;
pub mod config;
pub mod error;
pub mod logging;

pub use config::{ConfigAdapter, ConfigEvent, ConfigManager, EventType, WatchId};
pub use error::{ConfmuxError, ErrorKind, Result};
