//! Analysis state machine.
//!
//! One submitted image moves through a small progress model that UI callers
//! subscribe to: `Idle → Classifying → Ready → Explaining → Explained`, with
//! `Errored` reachable from either remote phase.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Progress state of the analysis flow for the currently bound image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisState {
    /// No image is bound.
    Idle,
    /// The primary classification call is in flight.
    Classifying,
    /// A classification is available; an explanation may be requested.
    Ready,
    /// The secondary explanation call is in flight.
    Explaining,
    /// An explanation is available; further requests hit the cache.
    Explained,
    /// A remote phase failed. Which one is recorded alongside the state.
    Errored,
}

impl AnalysisState {
    /// Checks whether the flow can transition to the given state.
    ///
    /// # Arguments
    /// * `to` - The target state
    ///
    /// # Returns
    /// Returns `true` if the transition is valid, `false` otherwise.
    #[must_use]
    pub fn can_transition_to(&self, to: Self) -> bool {
        match (self, to) {
            // A new submission supersedes whatever was happening; a reset is
            // always allowed
            (_, Self::Classifying | Self::Idle) => true,
            // From Classifying: the primary call resolves
            (Self::Classifying, Self::Ready | Self::Errored) => true,
            // From Ready or Explained: an explanation may be requested
            (Self::Ready | Self::Explained, Self::Explaining) => true,
            // From Explaining: the secondary call resolves
            (Self::Explaining, Self::Explained | Self::Errored) => true,
            // From Errored: an explanation may be retried while a bound
            // classification survives (the orchestrator guards the binding)
            (Self::Errored, Self::Explaining) => true,
            // Same state is always valid
            (a, b) if *a == b => true,
            // All other transitions are invalid
            _ => false,
        }
    }

    /// Whether an explanation request is acceptable from this state.
    #[must_use]
    pub fn accepts_explanation_request(&self) -> bool {
        matches!(self, Self::Ready | Self::Explained | Self::Errored)
    }
}

impl fmt::Display for AnalysisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Classifying => "classifying",
            Self::Ready => "ready",
            Self::Explaining => "explaining",
            Self::Explained => "explained",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}
