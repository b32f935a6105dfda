//! Change detection between applied and candidate configuration.

use serde::Serialize;

use crate::upstream::EffectiveConfiguration;

/// What to do with a candidate configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Identical to what is applied: no write, no reload.
    NoOp,
    /// Differs: write it and reload.
    Apply(EffectiveConfiguration),
}

impl Decision {
    pub fn kind(&self) -> DecisionKind {
        match self {
            Decision::NoOp => DecisionKind::NoOp,
            Decision::Apply(_) => DecisionKind::Apply,
        }
    }
}

/// [`Decision`] without its payload, for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    NoOp,
    Apply,
}

/// Compare exactly, ignoring only surrounding whitespace.
pub fn reconcile(current: &EffectiveConfiguration, candidate: EffectiveConfiguration) -> Decision {
    if current.as_str().trim() == candidate.as_str().trim() {
        Decision::NoOp
    } else {
        Decision::Apply(candidate)
    }
}
