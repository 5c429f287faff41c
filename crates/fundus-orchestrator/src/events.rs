//! Analysis event model for streaming progress to UI callers.
//!
//! This is the notification contract for the hybrid flow. The presentation
//! layer subscribes to these events for progress state, results, and errors;
//! the core renders nothing itself.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::AnalysisState;

/// The remote phase an event or error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisPhase {
    /// The primary classification call.
    Classification,
    /// The secondary explanation call.
    Explanation,
}

/// Progress events emitted during an analysis.
///
/// `analysis_id` correlates events belonging to one submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisEvent {
    /// The progress state changed.
    StateChanged {
        analysis_id: Uuid,
        from: AnalysisState,
        to: AnalysisState,
    },

    /// The primary call was issued for an image.
    ClassificationStarted {
        analysis_id: Uuid,
        image_name: String,
    },

    /// The primary call succeeded.
    ClassificationReady {
        analysis_id: Uuid,
        class_index: u32,
        class_name: String,
        confidence: f32,
    },

    /// The secondary flow began for a fingerprint (cache consultation
    /// included).
    ExplanationStarted {
        analysis_id: Uuid,
        fingerprint: String,
    },

    /// An explanation is available.
    ExplanationReady {
        analysis_id: Uuid,
        from_cache: bool,
    },

    /// A remote phase failed.
    AnalysisFailed {
        analysis_id: Uuid,
        phase: AnalysisPhase,
        message: String,
    },
}
