//! Pass outcome reporting.

use serde::Serialize;

use crate::sync::reconcile::DecisionKind;

/// What happened to one application during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApplicationStatus {
    /// Fresh registrations were fetched and rendered.
    Fetched { backends: usize },
    /// Registry unchanged since the last pass; previous block reused.
    Unchanged,
    /// Fetch or parse failed; previous block kept.
    Retained { error: String },
    /// Fetch or parse failed and there was no previous block to keep.
    Omitted { error: String },
}

impl ApplicationStatus {
    pub fn error(&self) -> Option<&str> {
        match self {
            ApplicationStatus::Retained { error } | ApplicationStatus::Omitted { error } => {
                Some(error)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationReport {
    pub application: String,
    #[serde(flatten)]
    pub status: ApplicationStatus,
    /// Whether this application's block differs from the applied one.
    pub changed: bool,
}

/// Whether the proxy was reloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reload", rename_all = "snake_case")]
pub enum ReloadStatus {
    NotAttempted,
    Succeeded,
    Failed { error: String },
}

/// Summary of a completed reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub decision: DecisionKind,
    pub dry_run: bool,
    pub applications: Vec<ApplicationReport>,
    #[serde(flatten)]
    pub reload: ReloadStatus,
}

impl PassReport {
    /// Names of applications whose block changed, in application order.
    pub fn changed_applications(&self) -> Vec<&str> {
        self.applications
            .iter()
            .filter(|a| a.changed)
            .map(|a| a.application.as_str())
            .collect()
    }

    /// Applications that failed this pass, with their errors.
    pub fn failures(&self) -> Vec<(&str, &str)> {
        self.applications
            .iter()
            .filter_map(|a| a.status.error().map(|e| (a.application.as_str(), e)))
            .collect()
    }

    pub fn reload_failed(&self) -> bool {
        matches!(self.reload, ReloadStatus::Failed { .. })
    }

    /// Human-readable outcome: one line on a quiet pass, a summary otherwise.
    pub fn summary(&self) -> String {
        let failures = self.failures();
        let mut lines = Vec::new();

        match self.decision {
            DecisionKind::NoOp => {
                lines.push("Upstream matches generated config, nothing to do".to_string());
            }
            DecisionKind::Apply if self.dry_run => {
                lines.push(format!(
                    "Dry run: configuration would change ({})",
                    self.changed_applications().join(", ")
                ));
            }
            DecisionKind::Apply => {
                lines.push(format!(
                    "Wrote new config ({})",
                    self.changed_applications().join(", ")
                ));
                match &self.reload {
                    ReloadStatus::Succeeded => lines.push("Proxy reloaded".to_string()),
                    ReloadStatus::Failed { error } => lines.push(format!(
                        "Proxy reload FAILED, running proxy may be stale: {}",
                        error
                    )),
                    ReloadStatus::NotAttempted => {}
                }
            }
        }

        for (application, error) in failures {
            lines.push(format!("  {}: {}", application, error));
        }

        lines.join("\n")
    }
}
