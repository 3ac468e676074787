//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the balancer.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the load balancer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Backend server definitions, in registration order.
    pub backends: Vec<BackendConfig>,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Status endpoints (`/stats`, `/dashboard`).
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
        }
    }
}

/// Backend server configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct BackendConfig {
    /// Unique backend identifier.
    pub name: String,

    /// Base URL of the backend (e.g., "http://127.0.0.1:5001").
    pub url: String,

    /// Capacity hint. Anything `<= 0` is treated as 1.
    #[serde(default = "default_weight")]
    pub weight: i64,
}

impl BackendConfig {
    /// Create a backend entry with the default weight.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            weight: default_weight(),
        }
    }

    /// Builder-style weight override.
    pub fn with_weight(mut self, weight: i64) -> Self {
        self.weight = weight;
        self
    }

    /// The weight actually used for selection.
    pub fn effective_weight(&self) -> u32 {
        normalize_weight(self.weight)
    }
}

/// Clamp a configured weight into the positive range used by the selector.
pub fn normalize_weight(weight: i64) -> u32 {
    if weight <= 0 {
        1
    } else {
        u32::try_from(weight).unwrap_or(u32::MAX)
    }
}

fn default_weight() -> i64 {
    1
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Per-probe timeout in seconds.
    pub timeout_secs: u64,

    /// Path to probe, relative to the backend URL.
    pub path: String,

    /// HTTP method used by the probe.
    pub method: String,
}

impl HealthCheckConfig {
    /// Probe period; never zero, since `tokio::time::interval` rejects it.
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 2,
            timeout_secs: 2,
            path: "/".to_string(),
            method: "HEAD".to_string(),
        }
    }
}

/// Timeout configuration for forwarded requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time for one request/response exchange, in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Status endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Serve `/stats` and `/dashboard` alongside proxied traffic.
    pub enabled: bool,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_normalization() {
        assert_eq!(normalize_weight(0), 1);
        assert_eq!(normalize_weight(-5), 1);
        assert_eq!(normalize_weight(1), 1);
        assert_eq!(normalize_weight(10), 10);
        assert_eq!(normalize_weight(i64::MAX), u32::MAX);
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [[backends]]
            name = "a"
            url = "http://127.0.0.1:5001"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "0.0.0.0:8000");
        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.backends[0].weight, 1);
        assert_eq!(config.health_check.interval_secs, 2);
        assert_eq!(config.health_check.method, "HEAD");
        assert!(config.admin.enabled);
    }
}
