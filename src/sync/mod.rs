//! Reconciliation subsystem.
//!
//! # Data Flow
//! ```text
//! engine.rs (one pass)
//!     → registry fetch per application (concurrent, ordered join)
//!     → upstream parse + render
//!     → reconcile.rs (NoOp | Apply) against writer.rs read_current
//!     → on Apply: writer.rs (temp file + rename) → reload.rs
//!     → tokens.rs (persist cache tokens once the file state is settled)
//!     → report.rs (PassReport)
//! ```
//!
//! # Design Decisions
//! - A pass is a plain async call; scheduling belongs to cron/systemd timers
//! - The configuration file is the only state carried between passes
//! - Passes are not mutually excluded here; the rename makes overlap last-writer-wins

pub mod engine;
pub mod error;
pub mod reconcile;
pub mod reload;
pub mod report;
pub mod tokens;
pub mod writer;

pub use engine::{Candidate, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use reconcile::{reconcile, Decision, DecisionKind};
pub use reload::{CommandReloader, Reloader};
pub use report::{ApplicationReport, ApplicationStatus, PassReport, ReloadStatus};
pub use tokens::{CachedRegistry, TokenCache};
pub use writer::ConfigWriter;
