//! `confmux validate`: check a sources manifest for errors.
//!
//! Parses and validates the manifest without constructing any adapter,
//! reporting results in either human-readable text or machine-readable
//! JSON format.

use crate::cli::{ValidateArgs, ValidateFormat};
use crate::config::format::Format;
use crate::config::manifest::parse_manifest_str;
use crate::config::validation;
use crate::error::{ConfmuxError, Result};

pub async fn execute(args: &ValidateArgs) -> Result<()> {
    let path = &args.manifest;

    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(ConfmuxError::ConfigFileNotFound { path: path.clone() });
    }

    let content = tokio::fs::read_to_string(path).await?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let manifest = parse_manifest_str(
        Format::from_extension(ext)?,
        &content,
        &path.display().to_string(),
    )?;

    if let Err(errors) = validation::validate(&manifest) {
        match args.format {
            ValidateFormat::Text => {
                eprintln!("\u{2717} {} has {} errors\n", path.display(), errors.len());
                for error in &errors {
                    eprintln!("{error}");
                }
            }
            ValidateFormat::Json => {
                let json_errors: Vec<serde_json::Value> = errors
                    .iter()
                    .map(|e| {
                        serde_json::json!({
                            "source": e.source,
                            "field": e.field,
                            "message": e.message,
                            "suggestion": e.suggestion,
                        })
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::json!({
                        "valid": false,
                        "errors": json_errors,
                    })
                );
            }
        }
        return Err(ConfmuxError::ManifestValidation { errors });
    }

    match args.format {
        ValidateFormat::Text => {
            println!(
                "\u{2713} {}",
                validation::format_validation_report(&path.display().to_string(), &manifest)
            );
        }
        ValidateFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "valid": true,
                    "sources": manifest.sources.len(),
                    "primary": manifest.primary,
                    "fallback": manifest.fallback,
                })
            );
        }
    }

    Ok(())
}
