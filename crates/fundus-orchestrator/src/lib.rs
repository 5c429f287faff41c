//! Hybrid inference orchestration for Fundus.
//!
//! This crate coordinates the two-phase classify-then-explain flow: a
//! mandatory primary classification call for a submitted retinal photograph,
//! then an optional, caller-triggered Grad-CAM explanation call that is
//! memoized by a content fingerprint so repeated requests for the same
//! image+options pair are free.
//!
//! The orchestrator is session-scoped and exposes a small progress state
//! machine to UI callers; the [`ExplanationCache`] is process-scoped and
//! injected by the application's composition root.

pub mod cache;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod orchestrator;
pub mod state;

pub use cache::{CacheStats, ExplanationCache};
pub use error::AnalysisError;
pub use events::{AnalysisEvent, AnalysisPhase};
pub use fingerprint::Fingerprint;
pub use orchestrator::{
    ExplanationTicket, InferenceOrchestrator, OrchestratorConfig, SubmitOutcome,
};
pub use state::AnalysisState;
