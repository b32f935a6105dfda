//! Store capability trait, cache tokens and store errors.

use std::fmt;
use std::future::Future;
use thiserror::Error;

/// Opaque version marker for a stored object (an ETag or equivalent).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheToken(String);

impl CacheToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a (possibly conditional) fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    /// Fresh content and, when the store reports one, its version token.
    Modified {
        content: Vec<u8>,
        token: Option<CacheToken>,
    },
    /// The supplied token still matches; no content was transferred.
    NotModified,
}

/// Precondition for a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCondition {
    /// Overwrite whatever is stored.
    Always,
    /// Only while the object is still at this version.
    Matches(CacheToken),
    /// Only if no object exists yet.
    Absent,
}

/// Errors that can occur talking to a registry store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No object under the requested key.
    #[error("object {bucket}/{key} not found")]
    NotFound { bucket: String, key: String },

    /// The store rejected our credentials.
    #[error("access denied (HTTP {0})")]
    Unauthorized(u16),

    /// Unexpected response status.
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// Connection or protocol failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Request exceeded the configured timeout.
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    /// A conditional write lost against a concurrent writer.
    #[error("object {bucket}/{key} changed concurrently")]
    Conflict { bucket: String, key: String },

    /// Local filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Capabilities every registry backend provides.
pub trait RegistryStore: Send + Sync {
    /// Fetch the object at `bucket`/`key`.
    ///
    /// When `if_none_match` equals the object's current version the store
    /// answers [`FetchResult::NotModified`] without transferring content.
    fn fetch(
        &self,
        bucket: &str,
        key: &str,
        if_none_match: Option<&CacheToken>,
    ) -> impl Future<Output = StoreResult<FetchResult>> + Send;

    /// Replace the object at `bucket`/`key` if `condition` holds.
    ///
    /// A failed precondition is [`StoreError::Conflict`]; the check and the
    /// write are one atomic step.
    fn put(
        &self,
        bucket: &str,
        key: &str,
        content: Vec<u8>,
        condition: WriteCondition,
    ) -> impl Future<Output = StoreResult<Option<CacheToken>>> + Send;
}
