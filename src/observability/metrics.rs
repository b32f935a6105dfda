//! Metrics collection and exposition.
//!
//! # Metrics
//! - `upstream_sync_passes_total` (counter): passes by outcome
//! - `upstream_sync_pass_duration_seconds` (histogram): wall time per pass
//! - `upstream_sync_fetch_total` (counter): fetches by application, result
//! - `upstream_sync_backends` (gauge): registered backends per application
//! - `upstream_sync_reloads_total` (counter): reloads by result
//!
//! # Design Decisions
//! - A pass is a short-lived process, so there is no scrape endpoint; the
//!   Prometheus rendering is written to a node_exporter textfile instead
//! - The textfile is replaced atomically, like the proxy configuration

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::sync::writer::write_atomic;

pub fn record_pass(outcome: &'static str) {
    ::metrics::counter!("upstream_sync_passes_total", "outcome" => outcome).increment(1);
}

pub fn record_pass_duration(start: Instant) {
    ::metrics::histogram!("upstream_sync_pass_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_fetch(application: &str, result: &'static str) {
    ::metrics::counter!(
        "upstream_sync_fetch_total",
        "application" => application.to_string(),
        "result" => result
    )
    .increment(1);
}

pub fn record_backends(application: &str, count: usize) {
    ::metrics::gauge!("upstream_sync_backends", "application" => application.to_string())
        .set(count as f64);
}

pub fn record_reload(success: bool) {
    let result = if success { "success" } else { "failure" };
    ::metrics::counter!("upstream_sync_reloads_total", "result" => result).increment(1);
}

/// Writes the Prometheus rendering of all recorded metrics to a file.
pub struct TextfileExporter {
    handle: PrometheusHandle,
    path: PathBuf,
}

impl TextfileExporter {
    /// Install the global Prometheus recorder.
    pub fn install(path: impl AsRef<Path>) -> Result<Self, BuildError> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        Ok(Self::with_handle(handle, path))
    }

    /// Export through an existing handle without touching the global recorder.
    pub fn with_handle(handle: PrometheusHandle, path: impl AsRef<Path>) -> Self {
        Self {
            handle,
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Replace the textfile with the current rendering.
    pub fn flush(&self) -> io::Result<()> {
        write_atomic(&self.path, self.handle.render().as_bytes())?;
        tracing::debug!(path = %self.path.display(), "Wrote metrics textfile");
        Ok(())
    }
}
