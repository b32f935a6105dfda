//! Reconciliation error taxonomy.

use std::path::PathBuf;
use thiserror::Error;

use crate::registry::StoreError;
use crate::upstream::MalformedRecord;

/// Errors raised during a reconciliation pass.
///
/// The first two are scoped to one application and never abort a pass; the
/// rest concern the shared configuration file or the proxy process.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The registry could not be read for this application.
    #[error("registry unavailable for {application}: {source}")]
    RegistryUnavailable {
        application: String,
        #[source]
        source: StoreError,
    },

    /// The application's registry blob contains a bad record.
    #[error("malformed registration for {application}: {source}")]
    MalformedRegistration {
        application: String,
        #[source]
        source: MalformedRecord,
    },

    /// The current configuration file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The new configuration could not be written; the old file stands.
    #[error("failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file was written but the proxy did not reload it.
    #[error("reload failed: {0}")]
    ReloadFailed(String),

    /// Not a single application could be fetched.
    #[error("registry unavailable for every application")]
    AllRegistriesUnavailable,
}

impl SyncError {
    /// Whether the error is confined to a single application.
    pub fn is_per_application(&self) -> bool {
        matches!(
            self,
            SyncError::RegistryUnavailable { .. } | SyncError::MalformedRegistration { .. }
        )
    }
}

/// Result type for reconciliation.
pub type SyncResult<T> = Result<T, SyncError>;
