//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::config::schema::{BackendConfig, ProxyConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// JSON files may hold a full config or just the backend list.
#[derive(Deserialize)]
#[serde(untagged)]
enum JsonConfig {
    Backends(Vec<BackendConfig>),
    Full(ProxyConfig),
}

/// Load and validate configuration from a TOML or JSON file.
///
/// The format is picked by extension: `.json` is JSON, anything else TOML.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config = if is_json(path) {
        parse_json(&content)?
    } else {
        toml::from_str(&content)?
    };

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn parse_json(content: &str) -> Result<ProxyConfig, serde_json::Error> {
    Ok(match serde_json::from_str(content)? {
        JsonConfig::Backends(backends) => ProxyConfig {
            backends,
            ..ProxyConfig::default()
        },
        JsonConfig::Full(config) => config,
    })
}
