//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the balancer.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::load_balancer::Algorithm;

/// Root configuration for the secure balancer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Backend server definitions, in rotation order.
    pub backends: Vec<BackendConfig>,

    /// Load balancing settings.
    pub load_balancer: LoadBalancerConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Traffic screening settings.
    pub security: SecurityConfig,

    /// Request log sink.
    pub request_log: RequestLogConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin (metrics/status) surface.
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
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Host name or IP of the backend.
    pub host: String,

    /// TCP port of the backend.
    pub port: u16,

    /// Weight for weighted round robin (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl BackendConfig {
    pub fn new(host: impl Into<String>, port: u16, weight: u32) -> Self {
        Self {
            host: host.into(),
            port,
            weight,
        }
    }
}

fn default_weight() -> u32 {
    1
}

fn default_backends() -> Vec<BackendConfig> {
    (8001..=8003)
        .map(|port| BackendConfig::new("localhost", port, 1))
        .collect()
}

/// Load balancing configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LoadBalancerConfig {
    /// Selection algorithm: round_robin, least_connections, weighted_round_robin.
    pub algorithm: Algorithm,
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Path to probe on every backend.
    pub path: String,

    /// Status code a ready backend answers with.
    pub expected_status: u16,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_secs: 5,
            path: "/health".to_string(),
            expected_status: 200,
        }
    }
}

/// Timeout configuration for external calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for a forwarded request (until response headers) in seconds.
    pub forward_secs: u64,

    /// Deadline for a single classifier call in milliseconds.
    pub classifier_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            forward_secs: 30,
            classifier_ms: 500,
        }
    }
}

/// Traffic screening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Run every request through the classifier.
    pub screening_enabled: bool,

    /// Reject requests the classifier flags as malicious.
    pub block_malicious: bool,

    /// Minimum confidence for an attack label to count as malicious.
    pub confidence_threshold: f64,

    /// Length of the per-IP tally window in seconds.
    pub window_secs: u64,

    /// Maximum buffered request body in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            screening_enabled: false,
            block_malicious: true,
            confidence_threshold: 0.7,
            window_secs: 60,
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Request log configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RequestLogConfig {
    /// Append JSON lines to this file; records go to tracing when unset.
    pub path: Option<String>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Prometheus endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin surface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Serve the admin router.
    pub enabled: bool,

    /// Admin bind address.
    pub bind_address: String,

    /// Bearer token required on admin routes, if set.
    pub api_key: Option<String>,

    /// Origins allowed to read admin routes cross-origin. `"*"` allows any
    /// origin; an empty list disables CORS.
    pub cors_origins: Vec<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:8090".to_string(),
            api_key: None,
            cors_origins: vec!["*".to_string()],
        }
    }
}

impl ProxyConfig {
    /// Defaults plus the three local backends the stock deployment ships with.
    pub fn with_default_backends() -> Self {
        Self {
            backends: default_backends(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [[backends]]
            host = "10.0.0.1"
            port = 9000

            [load_balancer]
            algorithm = "weighted_round_robin"
            "#,
        )
        .unwrap();

        assert_eq!(config.backends, vec![BackendConfig::new("10.0.0.1", 9000, 1)]);
        assert_eq!(config.load_balancer.algorithm, Algorithm::WeightedRoundRobin);
        assert_eq!(config.health_check.interval_secs, 30);
        assert_eq!(config.health_check.path, "/health");
        assert_eq!(config.timeouts.forward_secs, 30);
        assert!(!config.security.screening_enabled);
        assert!(config.security.block_malicious);
        assert_eq!(config.admin.cors_origins, vec!["*"]);
    }

    #[test]
    fn test_default_backends() {
        let config = ProxyConfig::with_default_backends();
        let ports: Vec<u16> = config.backends.iter().map(|b| b.port).collect();
        assert_eq!(ports, vec![8001, 8002, 8003]);
        assert_eq!(config.load_balancer.algorithm, Algorithm::LeastConnections);
    }
}
