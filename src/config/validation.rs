//! Configuration validation.
//!
//! Serde handles the syntax; this module checks the semantics and reports
//! every problem it finds, not just the first one.

use std::collections::HashSet;
use std::net::SocketAddr;

use axum::http::Method;
use url::Url;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid bind address `{0}`")]
    BindAddress(String),

    #[error("duplicate backend name `{0}`")]
    DuplicateBackend(String),

    #[error("backend `{name}` has an invalid url `{url}`")]
    BackendUrl { name: String, url: String },

    #[error("backend name must not be empty")]
    EmptyName,

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("invalid health check method `{0}`")]
    ProbeMethod(String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    let mut seen = HashSet::new();
    for backend in &config.backends {
        if backend.name.is_empty() {
            errors.push(ValidationError::EmptyName);
        } else if !seen.insert(backend.name.as_str()) {
            errors.push(ValidationError::DuplicateBackend(backend.name.clone()));
        }

        if !is_http_url(&backend.url) {
            errors.push(ValidationError::BackendUrl {
                name: backend.name.clone(),
                url: backend.url.clone(),
            });
        }
    }

    let health = &config.health_check;
    if health.enabled {
        if health.interval_secs == 0 {
            errors.push(ValidationError::ZeroDuration("health check interval"));
        }
        if health.timeout_secs == 0 {
            errors.push(ValidationError::ZeroDuration("health check timeout"));
        }
        if health.method.parse::<Method>().is_err() {
            errors.push(ValidationError::ProbeMethod(health.method.clone()));
        }
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroDuration("request timeout"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_http_url(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(url) => url.scheme() == "http" && url.host_str().is_some(),
        Err(_) => false,
    }
}
