//! S3-compatible HTTP registry client.
//!
//! # Responsibilities
//! - GET `<endpoint>/<bucket>/<key>` with `If-None-Match`
//! - Map `304 Not Modified` to an unchanged result without a body
//! - PUT with `If-Match` (or `If-None-Match: *` to create) for self-registration
//! - Translate transport failures and statuses into StoreError
//!
//! # Design Decisions
//! - One reqwest client per store, reused for every application in a pass
//! - Request timeout from config; a timeout is reported like any outage

use reqwest::header::{ETAG, IF_MATCH, IF_NONE_MATCH};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use url::Url;

use crate::config::RegistryConfig;
use crate::registry::types::{
    CacheToken, FetchResult, RegistryStore, StoreError, StoreResult, WriteCondition,
};

/// Registry store backed by an HTTP object endpoint.
#[derive(Clone)]
pub struct HttpStore {
    client: Client,
    endpoint: Url,
    auth_token: Option<String>,
    timeout_secs: u64,
}

impl HttpStore {
    /// Create a store from registry configuration.
    ///
    /// The bearer token, if configured, is read from the named environment
    /// variable once here.
    pub fn from_config(config: &RegistryConfig) -> StoreResult<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            StoreError::Transport(format!("invalid endpoint '{}': {}", config.endpoint, e))
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("upstream-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let auth_token = match &config.auth_token_env {
            Some(var) => match std::env::var(var) {
                Ok(token) => Some(token),
                Err(_) => {
                    tracing::warn!(variable = %var, "Registry auth token variable not set, continuing unauthenticated");
                    None
                }
            },
            None => None,
        };

        Ok(Self::with_client(client, endpoint, auth_token, config.timeout_secs))
    }

    /// Create a store around an existing client.
    pub fn with_client(
        client: Client,
        endpoint: Url,
        auth_token: Option<String>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            client,
            endpoint,
            auth_token,
            timeout_secs,
        }
    }

    fn object_url(&self, bucket: &str, key: &str) -> StoreResult<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Transport(format!("endpoint '{}' cannot be a base URL", self.endpoint)))?
            .pop_if_empty()
            .push(bucket)
            .extend(key.split('/'));
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn transport_error(&self, error: reqwest::Error) -> StoreError {
        if error.is_timeout() {
            StoreError::Timeout(self.timeout_secs)
        } else {
            StoreError::Transport(error.to_string())
        }
    }

    fn status_error(status: StatusCode, bucket: &str, key: &str) -> StoreError {
        match status {
            StatusCode::NOT_FOUND => StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                StoreError::Unauthorized(status.as_u16())
            }
            StatusCode::PRECONDITION_FAILED => StoreError::Conflict {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            other => StoreError::Status(other.as_u16()),
        }
    }
}

fn etag(response: &Response) -> Option<CacheToken> {
    response
        .headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(CacheToken::new)
}

impl RegistryStore for HttpStore {
    async fn fetch(
        &self,
        bucket: &str,
        key: &str,
        if_none_match: Option<&CacheToken>,
    ) -> StoreResult<FetchResult> {
        let url = self.object_url(bucket, key)?;
        let mut request = self.authorize(self.client.get(url));
        if let Some(token) = if_none_match {
            request = request.header(IF_NONE_MATCH, token.as_str());
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            tracing::debug!(bucket, key, "Registry object not modified");
            return Ok(FetchResult::NotModified);
        }
        if !status.is_success() {
            return Err(Self::status_error(status, bucket, key));
        }

        let token = etag(&response);
        let content = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?
            .to_vec();

        tracing::debug!(bucket, key, bytes = content.len(), "Fetched registry object");
        Ok(FetchResult::Modified { content, token })
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        content: Vec<u8>,
        condition: WriteCondition,
    ) -> StoreResult<Option<CacheToken>> {
        let url = self.object_url(bucket, key)?;
        let mut request = self.authorize(self.client.put(url)).body(content);
        request = match &condition {
            WriteCondition::Always => request,
            WriteCondition::Matches(token) => request.header(IF_MATCH, token.as_str()),
            WriteCondition::Absent => request.header(IF_NONE_MATCH, "*"),
        };

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(status, bucket, key));
        }

        Ok(etag(&response))
    }
}

impl std::fmt::Debug for HttpStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStore")
            .field("endpoint", &self.endpoint.as_str())
            .field("authenticated", &self.auth_token.is_some())
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}
