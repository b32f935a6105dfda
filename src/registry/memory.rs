//! In-process registry store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::registry::types::{
    CacheToken, FetchResult, RegistryStore, StoreError, StoreResult, WriteCondition,
};

#[derive(Debug, Clone)]
struct StoredObject {
    content: Vec<u8>,
    version: u64,
}

impl StoredObject {
    fn token(&self) -> CacheToken {
        CacheToken::new(format!("\"v{}\"", self.version))
    }
}

/// A registry held in memory.
///
/// Every write bumps a store-wide version counter, so tokens never repeat.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<(String, String), StoredObject>>,
    next_version: AtomicU64,
    fetches: AtomicUsize,
    transfers: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditionally store `content` under `bucket`/`key`.
    pub fn insert(&self, bucket: &str, key: &str, content: impl Into<Vec<u8>>) -> CacheToken {
        let object = StoredObject {
            content: content.into(),
            version: self.next_version.fetch_add(1, Ordering::Relaxed) + 1,
        };
        let token = object.token();
        self.lock().insert((bucket.to_string(), key.to_string()), object);
        token
    }

    /// Remove an object, so fetches of it fail with NotFound.
    pub fn remove(&self, bucket: &str, key: &str) {
        self.lock().remove(&(bucket.to_string(), key.to_string()));
    }

    /// Current content of an object.
    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.lock()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.content.clone())
    }

    /// Number of fetch calls answered so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Number of fetches that transferred content.
    pub fn transfer_count(&self) -> usize {
        self.transfers.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), StoredObject>> {
        // A poisoned map is still structurally sound; keep serving it.
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RegistryStore for MemoryStore {
    async fn fetch(
        &self,
        bucket: &str,
        key: &str,
        if_none_match: Option<&CacheToken>,
    ) -> StoreResult<FetchResult> {
        self.fetches.fetch_add(1, Ordering::Relaxed);

        let objects = self.lock();
        let object = objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;

        let token = object.token();
        if if_none_match == Some(&token) {
            return Ok(FetchResult::NotModified);
        }

        self.transfers.fetch_add(1, Ordering::Relaxed);
        Ok(FetchResult::Modified {
            content: object.content.clone(),
            token: Some(token),
        })
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        content: Vec<u8>,
        condition: WriteCondition,
    ) -> StoreResult<Option<CacheToken>> {
        let mut objects = self.lock();
        let id = (bucket.to_string(), key.to_string());

        let current = objects.get(&id).map(StoredObject::token);
        let holds = match &condition {
            WriteCondition::Always => true,
            WriteCondition::Matches(expected) => current.as_ref() == Some(expected),
            WriteCondition::Absent => current.is_none(),
        };
        if !holds {
            return Err(StoreError::Conflict {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let object = StoredObject {
            content,
            version: self.next_version.fetch_add(1, Ordering::Relaxed) + 1,
        };
        let token = object.token();
        objects.insert(id, object);
        Ok(Some(token))
    }
}
