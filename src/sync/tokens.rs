//! Persisted per-application cache entries.
//!
//! Two files per application under the cache directory:
//! ```text
//! <application>.registrations   canonical "<host> <port>" lines last fetched
//! <application>.cachekey        the store's version token for that content
//! ```
//! The token is only honoured together with its registrations, so an
//! unchanged registry is always re-rendered rather than copied from the
//! output file. A missing or unreadable entry only costs a full fetch.

use std::io;
use std::path::{Path, PathBuf};

use crate::registry::CacheToken;
use crate::sync::writer::write_atomic;
use crate::upstream::{parse, RegistrationSet};

/// The registrations an application had at a given store version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRegistry {
    pub token: CacheToken,
    pub registrations: RegistrationSet,
}

#[derive(Debug, Clone)]
pub struct TokenCache {
    dir: PathBuf,
}

impl TokenCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn token_path(&self, application: &str) -> PathBuf {
        self.dir.join(format!("{}.cachekey", application))
    }

    fn registrations_path(&self, application: &str) -> PathBuf {
        self.dir.join(format!("{}.registrations", application))
    }

    pub fn load(&self, application: &str) -> Option<CachedRegistry> {
        let token = read_entry(&self.token_path(application), application)?;
        let token = token.trim();
        if token.is_empty() {
            return None;
        }

        let text = read_entry(&self.registrations_path(application), application)?;
        match parse(text.as_bytes()) {
            Ok(registrations) => Some(CachedRegistry {
                token: CacheToken::new(token),
                registrations,
            }),
            Err(e) => {
                tracing::warn!(application, error = %e, "Corrupt cached registrations, fetching unconditionally");
                None
            }
        }
    }

    /// Persist an entry; the token is written last so it never outlives
    /// stale registrations.
    pub fn store(&self, application: &str, entry: &CachedRegistry) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        write_atomic(
            &self.registrations_path(application),
            entry.registrations.to_registry_text().as_bytes(),
        )?;
        write_atomic(&self.token_path(application), entry.token.as_str().as_bytes())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn read_entry(path: &Path, application: &str) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!(application, path = %path.display(), error = %e, "Unreadable cache entry, fetching unconditionally");
            None
        }
    }
}
