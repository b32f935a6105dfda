//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → SyncConfig (validated, immutable)
//!     → handed by value to the registry client, engine and reloader
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; every invocation reads it afresh
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    ApplicationConfig, LogFormat, ObservabilityConfig, RegistryBackend, RegistryConfig,
    ReloadConfig, SyncConfig, UpstreamConfig,
};
