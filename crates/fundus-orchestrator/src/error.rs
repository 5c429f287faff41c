// Error types for the analysis flow

use fundus_abstraction::InferenceError;
use thiserror::Error;

use crate::state::AnalysisState;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Errors surfaced by the orchestrator.
///
/// Remote failures are wrapped by the phase that produced them, so a failed
/// explanation can never be mistaken for a failed classification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    /// The submitted image carries no payload.
    #[error("image '{0}' has no content")]
    EmptyImage(String),

    /// The operation is not valid in the current state.
    #[error("{operation} is not valid while {state}")]
    InvalidState {
        /// The operation that was attempted
        operation: &'static str,
        /// The state the orchestrator was in
        state: AnalysisState,
    },

    /// A newer submission superseded this call; its result was discarded.
    #[error("superseded by a newer submission")]
    Superseded,

    /// The primary classification call failed.
    #[error("classification failed: {0}")]
    Classification(#[source] InferenceError),

    /// The secondary explanation call failed. The classification obtained
    /// before it remains valid.
    #[error("explanation failed: {0}")]
    Explanation(#[source] InferenceError),
}
