//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Application names must be usable as upstream identifiers and file names
//! - Backend-specific settings must be present for the selected backend
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SyncConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use url::Url;

use crate::config::schema::{RegistryBackend, SyncConfig};

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a deserialized configuration.
pub fn validate_config(config: &SyncConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.applications.is_empty() {
        errors.push(ValidationError::new(
            "applications",
            "at least one application is required",
        ));
    }

    let mut seen = HashSet::new();
    for (i, app) in config.applications.iter().enumerate() {
        let field = format!("applications[{}].name", i);
        if !is_valid_name(&app.name) {
            errors.push(ValidationError::new(
                field,
                format!("invalid application name {:?} (allowed: A-Z a-z 0-9 _ . -)", app.name),
            ));
        } else if !seen.insert(app.name.as_str()) {
            errors.push(ValidationError::new(
                field,
                format!("duplicate application name {:?}", app.name),
            ));
        }

        if matches!(app.key.as_deref(), Some(key) if key.trim().is_empty()) {
            errors.push(ValidationError::new(
                format!("applications[{}].key", i),
                "registry key must not be empty",
            ));
        }
    }

    let registry = &config.registry;
    if registry.bucket.trim().is_empty() {
        errors.push(ValidationError::new("registry.bucket", "bucket must not be empty"));
    }
    if registry.timeout_secs == 0 {
        errors.push(ValidationError::new("registry.timeout_secs", "timeout must be greater than 0"));
    }
    match registry.backend {
        RegistryBackend::Http => match Url::parse(&registry.endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(ValidationError::new(
                "registry.endpoint",
                format!("unsupported scheme {:?}", url.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new(
                "registry.endpoint",
                format!("invalid URL {:?}: {}", registry.endpoint, e),
            )),
        },
        RegistryBackend::Filesystem => {
            if registry.root.as_os_str().is_empty() {
                errors.push(ValidationError::new(
                    "registry.root",
                    "root is required for the filesystem backend",
                ));
            }
        }
    }

    if config.upstream.config_path.as_os_str().is_empty() {
        errors.push(ValidationError::new("upstream.config_path", "path must not be empty"));
    }
    if config.upstream.fallback.trim().is_empty() {
        errors.push(ValidationError::new("upstream.fallback", "fallback server must not be empty"));
    }

    if config.reload.command.first().map_or(true, |p| p.trim().is_empty()) {
        errors.push(ValidationError::new("reload.command", "reload command must not be empty"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ApplicationConfig;

    fn app(name: &str) -> ApplicationConfig {
        ApplicationConfig {
            name: name.to_string(),
            key: None,
        }
    }

    fn valid() -> SyncConfig {
        SyncConfig {
            applications: vec![app("web"), app("api")],
            ..SyncConfig::default()
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&valid()).is_ok());
    }

    #[test]
    fn test_duplicate_and_invalid_names() {
        let mut config = valid();
        config.applications.push(app("web"));
        config.applications.push(app("bad name"));

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].message.contains("duplicate"));
        assert_eq!(errors[1].field, "applications[3].name");
    }

    #[test]
    fn test_http_endpoint_checked() {
        let mut config = valid();
        config.registry.endpoint = "ftp://example.com".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "registry.endpoint");

        config.registry.endpoint = "not a url".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_filesystem_backend_ignores_endpoint() {
        let mut config = valid();
        config.registry.backend = RegistryBackend::Filesystem;
        config.registry.endpoint = String::new();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = SyncConfig::default();
        config.registry.bucket = " ".to_string();
        config.registry.timeout_secs = 0;
        config.reload.command.clear();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
    }
}
