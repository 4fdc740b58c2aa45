//! Structured document formats shared by the adapters and the manifest loader.
//!
//! YAML, JSON and TOML are gated by feature flags; the line-oriented
//! `properties` format is always available. Also hosts [`sha256_hex`],
//! used by the file adapter for change detection.

use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::snapshot::{flatten, render, set_dotted};
use crate::error::{ConfmuxError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[serde(alias = "yml")]
    Yaml,
    Json,
    Toml,
    Properties,
}

impl Format {
    /// Pick a format from a file extension.
    pub fn from_extension(ext: &str) -> Result<Self> {
        ext.parse()
    }

    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
            Self::Toml => "toml",
            Self::Properties => "properties",
        }
    }
}

impl FromStr for Format {
    type Err = ConfmuxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            "toml" => Ok(Self::Toml),
            "properties" | "props" => Ok(Self::Properties),
            other => Err(ConfmuxError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Deserialize a document into any serde type.
pub fn decode<T: DeserializeOwned>(format: Format, content: &str, origin: &str) -> Result<T> {
    match format {
        #[cfg(feature = "yaml")]
        Format::Yaml => serde_yml::from_str(content).map_err(|e| ConfmuxError::parse(origin, e)),

        #[cfg(feature = "json")]
        Format::Json => serde_json::from_str(content).map_err(|e| ConfmuxError::parse(origin, e)),

        #[cfg(feature = "toml")]
        Format::Toml => toml::from_str(content).map_err(|e| ConfmuxError::parse(origin, e)),

        Format::Properties => {
            let map = parse_properties(content);
            serde_json::from_value(Value::Object(map)).map_err(|e| ConfmuxError::parse(origin, e))
        }

        #[allow(unreachable_patterns)]
        other => Err(ConfmuxError::UnsupportedFormat(other.to_string())),
    }
}

/// Parse a document whose root must be a map. An empty document is an
/// empty map.
pub fn parse(format: Format, content: &str, origin: &str) -> Result<Map<String, Value>> {
    if content.trim().is_empty() {
        return Ok(Map::new());
    }
    match decode::<Value>(format, content, origin)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(ConfmuxError::parse(
            origin,
            format!("expected a key/value document at the root, found {}", type_name(&other)),
        )),
    }
}

pub fn serialize(format: Format, data: &Map<String, Value>) -> Result<String> {
    let origin = format!("<{format} output>");
    match format {
        #[cfg(feature = "yaml")]
        Format::Yaml => serde_yml::to_string(data).map_err(|e| ConfmuxError::parse(origin, e)),

        #[cfg(feature = "json")]
        Format::Json => {
            serde_json::to_string_pretty(data).map_err(|e| ConfmuxError::parse(origin, e))
        }

        #[cfg(feature = "toml")]
        Format::Toml => toml::to_string(data).map_err(|e| ConfmuxError::parse(origin, e)),

        Format::Properties => Ok(serialize_properties(data)),

        #[allow(unreachable_patterns)]
        other => Err(ConfmuxError::UnsupportedFormat(other.to_string())),
    }
}

/// `key=value` lines; `#` and `!` start comments. Dotted keys nest.
#[must_use]
pub fn parse_properties(content: &str) -> Map<String, Value> {
    let mut map = Map::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let Some((key, value)) = line.split_once('=').or_else(|| line.split_once(':')) else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        set_dotted(&mut map, key, coerce_scalar(value.trim()));
    }
    map
}

#[must_use]
pub fn serialize_properties(data: &Map<String, Value>) -> String {
    flatten(data)
        .iter()
        .map(|(key, value)| format!("{key}={}", render(value)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strip surrounding quotes and coerce booleans and numbers.
#[must_use]
pub fn coerce_scalar(raw: &str) -> Value {
    let value = raw.trim_matches(|c| c == '"' || c == '\'');
    match value {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(int) = value.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = value.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(float) {
            return Value::Number(number);
        }
    }
    Value::String(value.to_string())
}

/// Compute a lowercase hex-encoded SHA-256 digest.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a map",
    }
}
