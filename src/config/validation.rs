//! Sources manifest validation with detailed error reporting.
//!
//! The [`validate`] function checks a parsed [`Manifest`] for structural
//! errors such as empty names, dangling primary/fallback references,
//! unparsable Consul addresses, missing ConfigMap names, and zero
//! intervals or timeouts. Returns every problem at once as a list of
//! [`ValidationError`] values with per-field suggestions.

use std::collections::HashSet;

use url::Url;

use super::adapters::consul::ConsulAdapterConfig;
use super::adapters::kubecm::KubecmAdapterConfig;
use super::manifest::{Manifest, SourceConfig};
use crate::error::ValidationError;

const ROOT: &str = "(root)";

/// Validate a Consul address (`host:port` or a full http(s) URL).
pub fn validate_consul_address(config: &ConsulAdapterConfig) -> Result<(), String> {
    if config.address.trim().is_empty() {
        return Err("address cannot be empty".into());
    }
    if config.scheme != "http" && config.scheme != "https" {
        return Err(format!(
            "unsupported scheme '{}' (expected http or https)",
            config.scheme
        ));
    }
    config
        .base_url()
        .map(|_| ())
        .map_err(|_| format!("'{}' is not a valid address", config.address))
}

/// Validate a Kubernetes API server URL.
pub fn validate_api_server(config: &KubecmAdapterConfig) -> Result<(), String> {
    match Url::parse(&config.api_server) {
        Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => Ok(()),
        Ok(parsed) => Err(format!(
            "unsupported scheme '{}' (expected http or https)",
            parsed.scheme()
        )),
        Err(_) => Err(format!("'{}' is not a valid URL", config.api_server)),
    }
}

fn error(source: &str, field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError {
        source: source.into(),
        field: field.into(),
        message: message.into(),
        suggestion: None,
    }
}

fn check_positive(errors: &mut Vec<ValidationError>, source: &str, field: &str, value: u64) {
    if value == 0 {
        errors.push(error(source, field, "must be greater than zero"));
    }
}

fn suggest_name(manifest: &Manifest, wanted: &str) -> Option<String> {
    let wanted = wanted.to_ascii_lowercase();
    manifest
        .sources
        .keys()
        .find(|name| {
            let name = name.to_ascii_lowercase();
            name.starts_with(&wanted) || wanted.starts_with(&name)
        })
        .map(|name| format!("did you mean '{name}'?"))
}

pub fn validate(manifest: &Manifest) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if manifest.sources.is_empty() {
        errors.push(error(ROOT, "sources", "at least one source must be defined"));
        return Err(errors);
    }

    if let Some(ref primary) = manifest.primary {
        if !manifest.sources.contains_key(primary) {
            errors.push(ValidationError {
                suggestion: suggest_name(manifest, primary),
                ..error(ROOT, "primary", format!("unknown source '{primary}'"))
            });
        }
    }

    let mut seen_fallbacks = HashSet::new();
    for name in &manifest.fallback {
        if !manifest.sources.contains_key(name) {
            errors.push(ValidationError {
                suggestion: suggest_name(manifest, name),
                ..error(ROOT, "fallback", format!("unknown source '{name}'"))
            });
        }
        if manifest.primary.as_ref() == Some(name) {
            errors.push(error(
                ROOT,
                "fallback",
                format!("'{name}' is already the primary source"),
            ));
        }
        if !seen_fallbacks.insert(name) {
            errors.push(error(
                ROOT,
                "fallback",
                format!("'{name}' is listed more than once"),
            ));
        }
    }

    for (name, source) in &manifest.sources {
        let id = if name.trim().is_empty() {
            "(unnamed)"
        } else {
            name.as_str()
        };
        if name.trim().is_empty() {
            errors.push(error(id, "name", "source name cannot be empty"));
        }

        match source {
            SourceConfig::File(config) => {
                if config.path.is_none() && config.file_name.trim().is_empty() {
                    errors.push(ValidationError {
                        suggestion: Some("set 'path' or 'file_name'".into()),
                        ..error(id, "path", "no file to read")
                    });
                }
                check_positive(&mut errors, id, "interval_ms", config.interval_ms);
            }
            SourceConfig::Consul(config) => {
                if let Err(msg) = validate_consul_address(config) {
                    errors.push(error(id, "address", msg));
                }
                check_positive(&mut errors, id, "interval_ms", config.interval_ms);
                check_positive(&mut errors, id, "timeout_ms", config.timeout_ms);
            }
            SourceConfig::Kubecm(config) => {
                if config.config_map.trim().is_empty() {
                    errors.push(error(id, "config_map", "ConfigMap name is required"));
                }
                if config.namespace.trim().is_empty() {
                    errors.push(error(id, "namespace", "namespace cannot be empty"));
                }
                if config.data_key.trim().is_empty() {
                    errors.push(error(id, "data_key", "data key cannot be empty"));
                }
                if let Err(msg) = validate_api_server(config) {
                    errors.push(error(id, "api_server", msg));
                }
                check_positive(&mut errors, id, "interval_ms", config.interval_ms);
                check_positive(&mut errors, id, "timeout_ms", config.timeout_ms);
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// One-line summary of a valid manifest.
#[must_use]
pub fn format_validation_report(path: &str, manifest: &Manifest) -> String {
    format!(
        "{path} is valid ({} sources, primary: {}, fallback: {})",
        manifest.sources.len(),
        manifest.primary.as_deref().unwrap_or("(none)"),
        if manifest.fallback.is_empty() {
            "(none)".to_string()
        } else {
            manifest.fallback.join(", ")
        }
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::config::adapters::file::FileAdapterConfig;

    fn manifest(sources: Vec<(&str, SourceConfig)>) -> Manifest {
        Manifest {
            primary: None,
            fallback: Vec::new(),
            sources: sources
                .into_iter()
                .map(|(name, source)| (name.to_string(), source))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn file() -> SourceConfig {
        SourceConfig::File(FileAdapterConfig::with_path("app.yaml"))
    }

    #[test]
    fn valid_manifest() {
        let mut m = manifest(vec![
            ("local", file()),
            ("remote", SourceConfig::Consul(ConsulAdapterConfig::default())),
        ]);
        m.primary = Some("remote".into());
        m.fallback = vec!["local".into()];
        assert!(validate(&m).is_ok());
        assert_eq!(
            format_validation_report("confmux.yaml", &m),
            "confmux.yaml is valid (2 sources, primary: remote, fallback: local)"
        );
    }

    #[test]
    fn empty_sources() {
        let errors = validate(&Manifest::default()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "sources");
    }

    #[test]
    fn dangling_references_suggest_a_name() {
        let mut m = manifest(vec![(
            "remote",
            SourceConfig::Consul(ConsulAdapterConfig::default()),
        )]);
        m.primary = Some("remot".into());
        m.fallback = vec!["remote".into(), "remote".into()];
        let errors = validate(&m).unwrap_err();

        let primary = errors.iter().find(|e| e.field == "primary").unwrap();
        assert_eq!(primary.suggestion.as_deref(), Some("did you mean 'remote'?"));
        assert!(errors
            .iter()
            .any(|e| e.message.contains("listed more than once")));
    }

    #[test]
    fn primary_listed_as_fallback() {
        let mut m = manifest(vec![("local", file())]);
        m.primary = Some("local".into());
        m.fallback = vec!["local".into()];
        let errors = validate(&m).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("already the primary")));
    }

    #[test]
    fn collects_every_adapter_problem() {
        let consul = ConsulAdapterConfig {
            scheme: "ftp".into(),
            timeout_ms: 0,
            ..ConsulAdapterConfig::default()
        };
        let kubecm = KubecmAdapterConfig {
            api_server: "not a url".into(),
            interval_ms: 0,
            ..KubecmAdapterConfig::default()
        };
        let m = manifest(vec![
            ("c", SourceConfig::Consul(consul)),
            ("k", SourceConfig::Kubecm(kubecm)),
        ]);
        let errors = validate(&m).unwrap_err();
        let fields: Vec<(&str, &str)> = errors
            .iter()
            .map(|e| (e.source.as_str(), e.field.as_str()))
            .collect();
        assert!(fields.contains(&("c", "address")));
        assert!(fields.contains(&("c", "timeout_ms")));
        assert!(fields.contains(&("k", "config_map")));
        assert!(fields.contains(&("k", "api_server")));
        assert!(fields.contains(&("k", "interval_ms")));
    }
}
