//! Command-line interface definitions using clap derive macros.
//!
//! Contains the top-level [`Cli`] parser with its global flags, the
//! [`Commands`] enum for subcommands (get, dump, set, watch, validate),
//! and their associated argument structs. Global flags have an
//! environment variable equivalent for container deployments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "confmux",
    version,
    about = "Multi-source configuration manager",
    propagate_version = true,
    after_help = "\x1b[1mQuick start:\x1b[0m\n  \
        confmux dump                           Merged config from ./confmux.yaml\n  \
        confmux get app.name                   Resolve one key\n  \
        confmux watch 'app.*'                  Stream changes until Ctrl+C\n  \
        confmux validate confmux.yaml          Check a sources manifest"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Sources manifest (.yaml, .json, .toml); auto-detects ./confmux.*
    #[arg(short, long, global = true, env = "CONFMUX_SOURCES")]
    pub sources: Option<PathBuf>,

    /// Log level
    #[arg(
        short,
        long,
        global = true,
        env = "LOG_LEVEL",
        default_value = "warn"
    )]
    pub log_level: LogLevel,

    /// Force pretty (human-readable) log output
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Force JSON log output (overrides TTY detection)
    #[arg(long, global = true, conflicts_with = "pretty")]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve one key through the primary and fallback sources
    Get(GetArgs),

    /// Print the merged data of every available source
    Dump,

    /// Write a key through the primary source
    Set(SetArgs),

    /// Log every change matching a pattern until interrupted
    Watch(WatchArgs),

    /// Validate a sources manifest without contacting any source
    Validate(ValidateArgs),
}

#[derive(Args)]
pub struct GetArgs {
    /// Dotted key, e.g. `app.db.host`
    pub key: String,

    /// Value printed when the key resolves nowhere (parsed as JSON, else a string)
    #[arg(short, long)]
    pub default: Option<String>,
}

#[derive(Args)]
pub struct SetArgs {
    /// Dotted key, e.g. `app.db.host`
    pub key: String,

    /// New value (parsed as JSON, else stored as a string)
    pub value: String,
}

#[derive(Args)]
#[command(after_help = "\x1b[1mPatterns:\x1b[0m\n  \
        *              Every key\n  \
        app            app and everything below it\n  \
        app.*          Keys starting with 'app.'\n  \
        *.host         Keys ending with '.host'")]
pub struct WatchArgs {
    /// Key pattern to subscribe to
    #[arg(default_value = "*")]
    pub pattern: String,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Manifest to validate
    #[arg(default_value = "confmux.yaml")]
    pub manifest: PathBuf,

    /// Output format
    #[arg(long, default_value = "text")]
    pub format: ValidateFormat,
}

#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn to_tracing_level(&self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Clone, Debug, ValueEnum)]
pub enum ValidateFormat {
    Text,
    Json,
}

/// Interpret a command-line value as JSON, falling back to a plain string.
#[must_use]
pub fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "confmux",
            "get",
            "app.name",
            "--sources",
            "s.yaml",
            "--default",
            "x",
        ])
        .unwrap();
        assert_eq!(cli.sources, Some(PathBuf::from("s.yaml")));
        match cli.command {
            Some(Commands::Get(args)) => {
                assert_eq!(args.key, "app.name");
                assert_eq!(args.default.as_deref(), Some("x"));
            }
            _ => panic!("expected get"),
        }
    }

    #[test]
    fn values_parse_as_json_or_string() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value("{\"a\":1}"), json!({"a": 1}));
        assert_eq!(parse_value("hello"), json!("hello"));
    }
}
