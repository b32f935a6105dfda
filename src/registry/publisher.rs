//! Self-registration publisher.
//!
//! A backend node adds (or withdraws) its own address in its application's
//! registry blob. The read-modify-write is guarded by the fetched version
//! token, or by a create-only precondition when the blob does not exist yet,
//! so two nodes registering at once cannot drop each other's record; the
//! loser gets a Conflict and simply runs again.

use serde::Serialize;
use thiserror::Error;

use crate::registry::types::{FetchResult, RegistryStore, StoreError, WriteCondition};
use crate::upstream::endpoint::{BackendEndpoint, RegistrationSet};
use crate::upstream::parser::{parse, MalformedRecord};

/// What a publish call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishOutcome {
    Added,
    AlreadyPresent,
    Removed,
    NotPresent,
}

/// Errors from the publisher.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("registry error: {0}")]
    Store(#[from] StoreError),

    /// The existing blob is malformed; refusing to rewrite it.
    #[error("existing registration is malformed: {0}")]
    Malformed(#[from] MalformedRecord),
}

/// Add `endpoint` to the registry blob at `bucket`/`key`.
pub async fn register<S: RegistryStore>(
    store: &S,
    bucket: &str,
    key: &str,
    endpoint: BackendEndpoint,
) -> Result<PublishOutcome, PublishError> {
    update(store, bucket, key, |set| {
        if set.insert(endpoint.clone()) {
            PublishOutcome::Added
        } else {
            PublishOutcome::AlreadyPresent
        }
    })
    .await
}

/// Remove `endpoint` from the registry blob at `bucket`/`key`.
pub async fn deregister<S: RegistryStore>(
    store: &S,
    bucket: &str,
    key: &str,
    endpoint: &BackendEndpoint,
) -> Result<PublishOutcome, PublishError> {
    update(store, bucket, key, |set| {
        if set.remove(endpoint) {
            PublishOutcome::Removed
        } else {
            PublishOutcome::NotPresent
        }
    })
    .await
}

async fn update<S, F>(
    store: &S,
    bucket: &str,
    key: &str,
    change: F,
) -> Result<PublishOutcome, PublishError>
where
    S: RegistryStore,
    F: FnOnce(&mut RegistrationSet) -> PublishOutcome,
{
    let (mut set, condition) = match store.fetch(bucket, key, None).await {
        Ok(FetchResult::Modified { content, token }) => {
            let condition = match token {
                Some(token) => WriteCondition::Matches(token),
                None => {
                    tracing::warn!(bucket, key, "Store returned no version token, writing unconditionally");
                    WriteCondition::Always
                }
            };
            (parse(&content)?, condition)
        }
        // Unconditional fetches never come back NotModified; if one does, only
        // a create can be safe.
        Ok(FetchResult::NotModified) => (RegistrationSet::new(), WriteCondition::Absent),
        Err(e) if e.is_not_found() => (RegistrationSet::new(), WriteCondition::Absent),
        Err(e) => return Err(e.into()),
    };

    let outcome = change(&mut set);
    if matches!(outcome, PublishOutcome::AlreadyPresent | PublishOutcome::NotPresent) {
        tracing::info!(bucket, key, outcome = ?outcome, "Registration already up to date");
        return Ok(outcome);
    }

    store
        .put(bucket, key, set.to_registry_text().into_bytes(), condition)
        .await?;

    tracing::info!(bucket, key, outcome = ?outcome, backends = set.len(), "Published registration");
    Ok(outcome)
}
