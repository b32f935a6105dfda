//! One reconciliation pass.
//!
//! # Responsibilities
//! - Fetch every application's registry concurrently
//! - Render fresh or cached registrations, keep previous blocks for failures
//! - Decide NoOp / Apply against the file on disk
//! - Write atomically, reload, then persist cache entries
//!
//! # Failure containment
//! ```text
//! Fetch/Parse fails for one app → keep that app's previous block, continue
//! Every app unavailable        → abort, touch nothing
//! Write fails                  → abort, no reload, old file stands
//! Reload fails                 → file stands, reported in PassReport
//! ```

use futures_util::future::join_all;
use std::collections::HashMap;
use std::time::Instant;

use crate::config::SyncConfig;
use crate::observability::metrics;
use crate::registry::{CacheToken, FetchResult, RegistryStore, StoreError};
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::reconcile::{reconcile, Decision, DecisionKind};
use crate::sync::reload::Reloader;
use crate::sync::report::{ApplicationReport, ApplicationStatus, PassReport, ReloadStatus};
use crate::sync::tokens::{CachedRegistry, TokenCache};
use crate::sync::writer::ConfigWriter;
use crate::upstream::{parse, Application, EffectiveConfiguration, RegistrationSet, Renderer, UpstreamBlock};

/// Result of fetching and parsing one application.
#[derive(Debug)]
enum Fetched {
    Fresh {
        regs: RegistrationSet,
        token: Option<CacheToken>,
    },
    /// The store still holds the cached version; render from the cache.
    Unchanged { regs: RegistrationSet },
    Failed(SyncError),
}

/// A rendered candidate and everything needed to apply it.
#[derive(Debug)]
pub struct Candidate {
    /// What is on disk now.
    pub current: EffectiveConfiguration,
    /// What the registries say it should be.
    pub configuration: EffectiveConfiguration,
    pub applications: Vec<ApplicationReport>,
    /// Cache entries from fresh fetches, persisted once the pass settles.
    tokens: Vec<(String, CachedRegistry)>,
}

/// Reconciles registry state into the proxy configuration file.
///
/// Holds no state between passes beyond what is on disk.
pub struct SyncEngine<S, R> {
    store: S,
    reloader: R,
    bucket: String,
    applications: Vec<Application>,
    renderer: Renderer,
    writer: ConfigWriter,
    tokens: TokenCache,
    dry_run: bool,
}

impl<S: RegistryStore, R: Reloader> SyncEngine<S, R> {
    pub fn new(
        store: S,
        reloader: R,
        bucket: impl Into<String>,
        applications: Vec<Application>,
        renderer: Renderer,
        writer: ConfigWriter,
        tokens: TokenCache,
    ) -> Self {
        Self {
            store,
            reloader,
            bucket: bucket.into(),
            applications,
            renderer,
            writer,
            tokens,
            dry_run: false,
        }
    }

    /// Wire an engine from configuration around the given store and reloader.
    pub fn from_config(config: &SyncConfig, store: S, reloader: R) -> Self {
        Self::new(
            store,
            reloader,
            config.registry.bucket.clone(),
            config.applications.iter().map(Application::from).collect(),
            Renderer::new(config.upstream.fallback.clone()),
            ConfigWriter::new(config.upstream.config_path.clone()),
            TokenCache::new(config.upstream.cache_dir.clone()),
        )
    }

    /// Render and reconcile only; never write, reload or persist tokens.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one complete pass.
    pub async fn run_pass(&self) -> SyncResult<PassReport> {
        let start = Instant::now();
        let result = self.run_pass_inner().await;
        metrics::record_pass_duration(start);

        match &result {
            Ok(report) if self.dry_run => {
                tracing::debug!(decision = ?report.decision, "Dry run complete");
                metrics::record_pass("dry_run");
            }
            Ok(report) => metrics::record_pass(match report.decision {
                DecisionKind::NoOp => "noop",
                DecisionKind::Apply => "applied",
            }),
            Err(SyncError::WriteFailed { .. }) => metrics::record_pass("write_failed"),
            Err(SyncError::AllRegistriesUnavailable) => metrics::record_pass("unavailable"),
            Err(_) => metrics::record_pass("failed"),
        }
        result
    }

    async fn run_pass_inner(&self) -> SyncResult<PassReport> {
        let candidate = self.candidate().await?;
        let decision = reconcile(&candidate.current, candidate.configuration.clone());
        let decision_kind = decision.kind();
        let mut reload = ReloadStatus::NotAttempted;

        match decision {
            Decision::NoOp => {
                tracing::info!("Upstream matches generated config, nothing to do");
            }
            Decision::Apply(_) if self.dry_run => {
                tracing::info!("Dry run: configuration differs, not writing");
            }
            Decision::Apply(configuration) => {
                // Nothing after this point runs if the write fails.
                self.writer.write(&configuration)?;
                reload = self.reload().await;
            }
        }

        if !self.dry_run {
            self.persist_tokens(&candidate.tokens);
        }

        Ok(PassReport {
            decision: decision_kind,
            dry_run: self.dry_run,
            applications: candidate.applications,
            reload,
        })
    }

    async fn reload(&self) -> ReloadStatus {
        match self.reloader.reload().await {
            Ok(()) => {
                tracing::info!("Proxy reloaded");
                metrics::record_reload(true);
                ReloadStatus::Succeeded
            }
            Err(e) => {
                let error = SyncError::ReloadFailed(e);
                tracing::error!(error = %error, path = %self.writer.path().display(), "New configuration written but proxy reload failed");
                metrics::record_reload(false);
                ReloadStatus::Failed {
                    error: error.to_string(),
                }
            }
        }
    }

    fn persist_tokens(&self, entries: &[(String, CachedRegistry)]) {
        for (application, entry) in entries {
            if let Err(e) = self.tokens.store(application, entry) {
                tracing::warn!(application = %application, dir = %self.tokens.dir().display(), error = %e, "Failed to persist cache entry");
            }
        }
    }

    /// Fetch, parse and render every application into a candidate.
    pub async fn candidate(&self) -> SyncResult<Candidate> {
        let current = self.writer.read_current()?;
        let previous = current.blocks();

        let fetches = self
            .applications
            .iter()
            .map(|app| self.fetch_application(app, self.tokens.load(&app.name)));
        // join_all yields results in input order, whatever order they finish in.
        let results = join_all(fetches).await;

        self.assemble(current, &previous, results)
    }

    fn assemble(
        &self,
        current: EffectiveConfiguration,
        previous: &HashMap<String, UpstreamBlock>,
        results: Vec<Fetched>,
    ) -> SyncResult<Candidate> {
        let mut blocks = Vec::with_capacity(results.len());
        let mut applications = Vec::with_capacity(results.len());
        let mut tokens = Vec::new();
        let mut unavailable = 0;

        for (app, fetched) in self.applications.iter().zip(results) {
            let previous_block = previous.get(&app.name);

            let (regs, status) = match fetched {
                Fetched::Fresh { regs, token } => {
                    let status = ApplicationStatus::Fetched {
                        backends: regs.len(),
                    };
                    if let Some(token) = token {
                        let entry = CachedRegistry {
                            token,
                            registrations: regs.clone(),
                        };
                        tokens.push((app.name.clone(), entry));
                    }
                    (regs, status)
                }
                Fetched::Unchanged { regs } => (regs, ApplicationStatus::Unchanged),
                Fetched::Failed(error) => {
                    if matches!(error, SyncError::RegistryUnavailable { .. }) {
                        unavailable += 1;
                    }
                    let status = match previous_block {
                        Some(block) => {
                            tracing::warn!(application = %app.name, "Keeping previous upstream block");
                            blocks.push(block.clone());
                            ApplicationStatus::Retained {
                                error: error.to_string(),
                            }
                        }
                        None => {
                            tracing::warn!(application = %app.name, "No previous upstream block, omitting application");
                            ApplicationStatus::Omitted {
                                error: error.to_string(),
                            }
                        }
                    };
                    applications.push(ApplicationReport {
                        application: app.name.clone(),
                        status,
                        changed: false,
                    });
                    continue;
                }
            };

            // Cached registrations are rendered as well, never copied from disk.
            let block = self.renderer.render(app, &regs);
            let changed = previous_block != Some(&block);
            metrics::record_backends(&app.name, regs.len());
            blocks.push(block);
            applications.push(ApplicationReport {
                application: app.name.clone(),
                status,
                changed,
            });
        }

        if !self.applications.is_empty() && unavailable == self.applications.len() {
            tracing::error!(bucket = %self.bucket, "Registry unavailable for every application");
            return Err(SyncError::AllRegistriesUnavailable);
        }

        Ok(Candidate {
            current,
            configuration: EffectiveConfiguration::from_blocks(&blocks),
            applications,
            tokens,
        })
    }

    async fn fetch_application(&self, app: &Application, cached: Option<CachedRegistry>) -> Fetched {
        let token = cached.as_ref().map(|c| &c.token);
        let mut result = self.store.fetch(&self.bucket, &app.key, token).await;

        if matches!(result, Ok(FetchResult::NotModified)) {
            if let Some(cached) = cached {
                tracing::debug!(application = %app.name, "Registry unchanged");
                metrics::record_fetch(&app.name, "unchanged");
                return Fetched::Unchanged {
                    regs: cached.registrations,
                };
            }
            // Nothing cached to render from; ask again for the content itself.
            tracing::debug!(application = %app.name, "Unchanged without a cache entry, refetching");
            result = self.store.fetch(&self.bucket, &app.key, None).await;
        }

        let (content, fresh_token) = match result {
            Ok(FetchResult::Modified { content, token }) => (content, token),
            Ok(FetchResult::NotModified) => {
                return self.unavailable(app, StoreError::Status(304));
            }
            Err(source) => return self.unavailable(app, source),
        };

        match parse(&content) {
            Ok(regs) => {
                tracing::debug!(application = %app.name, backends = regs.len(), "Fetched registrations");
                metrics::record_fetch(&app.name, "fresh");
                Fetched::Fresh {
                    regs,
                    token: fresh_token,
                }
            }
            Err(source) => {
                let error = SyncError::MalformedRegistration {
                    application: app.name.clone(),
                    source,
                };
                tracing::error!(application = %app.name, error = %error, "Rejecting registration");
                metrics::record_fetch(&app.name, "malformed");
                Fetched::Failed(error)
            }
        }
    }

    fn unavailable(&self, app: &Application, source: StoreError) -> Fetched {
        let error = SyncError::RegistryUnavailable {
            application: app.name.clone(),
            source,
        };
        tracing::warn!(application = %app.name, key = %app.key, error = %error, "Registry fetch failed");
        metrics::record_fetch(&app.name, "unavailable");
        Fetched::Failed(error)
    }
}

impl<S, R> std::fmt::Debug for SyncEngine<S, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("bucket", &self.bucket)
            .field("applications", &self.applications)
            .field("config_path", &self.writer.path())
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MemoryStore, WriteCondition};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingReloader {
        calls: AtomicUsize,
    }

    impl Reloader for CountingReloader {
        async fn reload(&self) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn engine(dir: &std::path::Path, store: MemoryStore, apps: &[&str]) -> SyncEngine<MemoryStore, CountingReloader> {
        SyncEngine::new(
            store,
            CountingReloader::default(),
            "lb",
            apps.iter().map(|a| Application::new(*a, *a)).collect(),
            Renderer::default(),
            ConfigWriter::new(dir.join("upstream.conf")),
            TokenCache::new(dir.join("cache")),
        )
    }

    #[tokio::test]
    async fn test_first_pass_applies() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        store.insert("lb", "web", "10.0.0.1 8080\n");

        let engine = engine(dir.path(), store, &["web"]);
        let report = engine.run_pass().await.unwrap();

        assert_eq!(report.decision, DecisionKind::Apply);
        assert_eq!(report.reload, ReloadStatus::Succeeded);
        assert_eq!(engine.reloader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("upstream.conf")).unwrap(),
            "upstream web {\n    server [10.0.0.1]:8080;\n    server [::1]:9090 backup;\n}\n"
        );
    }

    #[tokio::test]
    async fn test_unchanged_registry_skips_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        store.insert("lb", "web", "10.0.0.1 8080\n");

        let engine = engine(dir.path(), store, &["web"]);
        engine.run_pass().await.unwrap();
        let report = engine.run_pass().await.unwrap();

        assert_eq!(report.decision, DecisionKind::NoOp);
        assert_eq!(report.applications[0].status, ApplicationStatus::Unchanged);
        assert_eq!(engine.store().fetch_count(), 2);
        assert_eq!(engine.store().transfer_count(), 1);
        assert_eq!(engine.reloader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_config_file_rebuilt_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        store.insert("lb", "web", "10.0.0.1 8080\n");

        let engine = engine(dir.path(), store, &["web"]);
        engine.run_pass().await.unwrap();
        let written = std::fs::read_to_string(dir.path().join("upstream.conf")).unwrap();
        std::fs::remove_file(dir.path().join("upstream.conf")).unwrap();

        let report = engine.run_pass().await.unwrap();
        assert_eq!(report.decision, DecisionKind::Apply);
        assert_eq!(report.applications[0].status, ApplicationStatus::Unchanged);
        assert_eq!(std::fs::read_to_string(dir.path().join("upstream.conf")).unwrap(), written);
        assert_eq!(engine.store().transfer_count(), 1);
    }

    #[tokio::test]
    async fn test_fallback_change_applies_without_registry_change() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        store.insert("lb", "web", "10.0.0.1 8080\n");

        let mut engine = engine(dir.path(), store, &["web"]);
        engine.run_pass().await.unwrap();

        engine.renderer = Renderer::new("[127.0.0.1]:8999");
        let report = engine.run_pass().await.unwrap();

        assert_eq!(report.decision, DecisionKind::Apply);
        assert_eq!(report.changed_applications(), vec!["web"]);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("upstream.conf")).unwrap(),
            "upstream web {\n    server [10.0.0.1]:8080;\n    server [127.0.0.1]:8999 backup;\n}\n"
        );
        assert_eq!(engine.store().transfer_count(), 1);
        assert_eq!(engine.reloader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_hand_edited_block_is_restored() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        store.insert("lb", "web", "10.0.0.1 8080\n");

        let engine = engine(dir.path(), store, &["web"]);
        engine.run_pass().await.unwrap();
        let written = std::fs::read_to_string(dir.path().join("upstream.conf")).unwrap();

        std::fs::write(
            dir.path().join("upstream.conf"),
            "upstream web {\n    server [10.9.9.9]:80;\n}\n",
        )
        .unwrap();
        let report = engine.run_pass().await.unwrap();

        assert_eq!(report.decision, DecisionKind::Apply);
        assert_eq!(std::fs::read_to_string(dir.path().join("upstream.conf")).unwrap(), written);
        assert_eq!(engine.store().transfer_count(), 1);
    }

    /// Answers the first fetch with NotModified whatever the token.
    struct StaleFirstStore {
        inner: MemoryStore,
        stale: std::sync::atomic::AtomicBool,
    }

    impl RegistryStore for StaleFirstStore {
        async fn fetch(
            &self,
            bucket: &str,
            key: &str,
            if_none_match: Option<&CacheToken>,
        ) -> crate::registry::StoreResult<FetchResult> {
            if self.stale.swap(false, Ordering::SeqCst) {
                return Ok(FetchResult::NotModified);
            }
            self.inner.fetch(bucket, key, if_none_match).await
        }

        async fn put(
            &self,
            bucket: &str,
            key: &str,
            content: Vec<u8>,
            condition: WriteCondition,
        ) -> crate::registry::StoreResult<Option<CacheToken>> {
            self.inner.put(bucket, key, content, condition).await
        }
    }

    #[tokio::test]
    async fn test_unchanged_without_cache_entry_refetches() {
        let dir = tempfile::tempdir().unwrap();
        let inner = MemoryStore::new();
        inner.insert("lb", "web", "10.0.0.1 8080\n");
        let store = StaleFirstStore {
            inner,
            stale: std::sync::atomic::AtomicBool::new(true),
        };

        let engine = SyncEngine::new(
            store,
            CountingReloader::default(),
            "lb",
            vec![Application::new("web", "web")],
            Renderer::default(),
            ConfigWriter::new(dir.path().join("upstream.conf")),
            TokenCache::new(dir.path().join("cache")),
        );
        let report = engine.run_pass().await.unwrap();

        assert_eq!(report.decision, DecisionKind::Apply);
        assert_eq!(report.applications[0].status, ApplicationStatus::Fetched { backends: 1 });
        assert_eq!(engine.store().inner.transfer_count(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        store.insert("lb", "web", "10.0.0.1 8080\n");

        let engine = engine(dir.path(), store, &["web"]).dry_run(true);
        let report = engine.run_pass().await.unwrap();

        assert!(report.dry_run);
        assert_eq!(report.changed_applications(), vec!["web"]);
        assert!(!dir.path().join("upstream.conf").exists());
        assert!(!dir.path().join("cache").exists());
        assert_eq!(engine.reloader.calls.load(Ordering::SeqCst), 0);
    }
}
