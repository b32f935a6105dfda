//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events on stderr)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → journald / log aggregation
//!     → node_exporter textfile collector (optional)
//! ```
//!
//! # Design Decisions
//! - stdout is reserved for command output; logs go to stderr
//! - Metrics are no-ops unless a textfile exporter is installed

pub mod logging;
pub mod metrics;
