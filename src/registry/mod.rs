//! Registry store subsystem.
//!
//! # Data Flow
//! ```text
//! engine (per application, concurrently)
//!     → RegistryStore::fetch(bucket, key, cache token)
//!         - http.rs (S3-compatible endpoint, ETag / If-None-Match)
//!         - fs.rs (directory tree, mtime+length token)
//!         - memory.rs (in-process map, tests and tooling)
//!     → FetchResult::Modified { content, token } | FetchResult::NotModified
//!
//! publisher.rs (self-registration)
//!     → fetch current blob → add/remove endpoint → conditional put
//! ```
//!
//! # Design Decisions
//! - Stores are values handed to the engine, never process-wide singletons
//! - New backends implement RegistryStore; nothing subclasses anything
//! - No retries here; a failed fetch is retried by the next pass

pub mod fs;
pub mod http;
pub mod memory;
pub mod publisher;
pub mod types;

pub use fs::FsStore;
pub use http::HttpStore;
pub use memory::MemoryStore;
pub use types::{CacheToken, FetchResult, RegistryStore, StoreError, StoreResult, WriteCondition};

use crate::config::{RegistryBackend, RegistryConfig};

/// The store selected by configuration.
#[derive(Debug, Clone)]
pub enum ConfiguredStore {
    Http(HttpStore),
    Filesystem(FsStore),
}

impl ConfiguredStore {
    /// Build the store named by `config.backend`.
    pub fn from_config(config: &RegistryConfig) -> StoreResult<Self> {
        match config.backend {
            RegistryBackend::Http => Ok(Self::Http(HttpStore::from_config(config)?)),
            RegistryBackend::Filesystem => Ok(Self::Filesystem(FsStore::new(&config.root))),
        }
    }
}

impl RegistryStore for ConfiguredStore {
    async fn fetch(
        &self,
        bucket: &str,
        key: &str,
        if_none_match: Option<&CacheToken>,
    ) -> StoreResult<FetchResult> {
        match self {
            Self::Http(store) => store.fetch(bucket, key, if_none_match).await,
            Self::Filesystem(store) => store.fetch(bucket, key, if_none_match).await,
        }
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        content: Vec<u8>,
        condition: WriteCondition,
    ) -> StoreResult<Option<CacheToken>> {
        match self {
            Self::Http(store) => store.put(bucket, key, content, condition).await,
            Self::Filesystem(store) => store.put(bucket, key, content, condition).await,
        }
    }
}
