//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the sync
//! engine. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::upstream::render::DEFAULT_FALLBACK;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SyncConfig {
    /// Where backend registrations are read from.
    pub registry: RegistryConfig,

    /// Applications to render, in output order.
    pub applications: Vec<ApplicationConfig>,

    /// Rendered configuration output.
    pub upstream: UpstreamConfig,

    /// Proxy reload command.
    pub reload: ReloadConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Registry store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    /// S3-compatible HTTP object endpoint.
    Http,
    /// Local (or network-mounted) directory tree.
    Filesystem,
}

/// Registry store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub backend: RegistryBackend,

    /// Base URL of the object endpoint (http backend).
    pub endpoint: String,

    /// Bucket holding one object per application.
    pub bucket: String,

    /// Root directory; buckets are its subdirectories (filesystem backend).
    pub root: PathBuf,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Environment variable holding a bearer token, if the store needs one.
    pub auth_token_env: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::Http,
            endpoint: "http://127.0.0.1:9000".to_string(),
            bucket: "lb-registry".to_string(),
            root: PathBuf::from("/var/lib/upstream-sync/registry"),
            timeout_secs: 10,
            auth_token_env: None,
        }
    }
}

/// One application whose backends are load-balanced.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApplicationConfig {
    /// Upstream name used in the rendered configuration.
    pub name: String,

    /// Registry key; defaults to `name`.
    #[serde(default)]
    pub key: Option<String>,
}

/// Rendered output configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// File holding the last applied configuration.
    pub config_path: PathBuf,

    /// Directory for per-application cache tokens.
    pub cache_dir: PathBuf,

    /// Backup server appended to every upstream block.
    pub fallback: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/etc/nginx/conf.d/upstream.conf"),
            cache_dir: PathBuf::from("/var/lib/upstream-sync"),
            fallback: DEFAULT_FALLBACK.to_string(),
        }
    }
}

/// Reload command configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReloadConfig {
    /// Program and arguments, run without a shell.
    pub command: Vec<String>,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "systemctl".to_string(),
                "reload".to_string(),
                "nginx".to_string(),
            ],
        }
    }
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

    pub log_format: LogFormat,

    /// Prometheus textfile written after each pass, if set.
    pub metrics_textfile: Option<PathBuf>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_textfile: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let config: SyncConfig = toml::from_str(
            r#"
            [[applications]]
            name = "web"
            "#,
        )
        .unwrap();

        assert_eq!(config.applications.len(), 1);
        assert_eq!(config.registry.backend, RegistryBackend::Http);
        assert_eq!(config.upstream.fallback, "[::1]:9090");
        assert_eq!(config.reload.command, vec!["systemctl", "reload", "nginx"]);
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_full_config() {
        let config: SyncConfig = toml::from_str(
            r#"
            [registry]
            backend = "filesystem"
            root = "/srv/registry"
            bucket = "prod"

            [[applications]]
            name = "web"

            [[applications]]
            name = "api"
            key = "services/api"

            [upstream]
            config_path = "/tmp/upstream.conf"

            [reload]
            command = ["nginx", "-s", "reload"]

            [observability]
            log_format = "json"
            metrics_textfile = "/tmp/upstream_sync.prom"
            "#,
        )
        .unwrap();

        assert_eq!(config.registry.backend, RegistryBackend::Filesystem);
        assert_eq!(config.registry.root, PathBuf::from("/srv/registry"));
        assert_eq!(config.applications[1].key.as_deref(), Some("services/api"));
        assert_eq!(config.reload.command[0], "nginx");
        assert_eq!(config.observability.log_format, LogFormat::Json);
        // Untouched sections keep their defaults.
        assert_eq!(config.registry.timeout_secs, 10);
    }
}
