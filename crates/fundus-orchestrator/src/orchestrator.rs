//! The hybrid inference orchestrator.
//!
//! Drives, for one image at a time, a mandatory primary classification call
//! and an optional, caller-triggered secondary explanation call that consults
//! the [`ExplanationCache`] before touching the network.
//!
//! Overlap policy: `submit` is cancel-and-supersede. Every submission bumps
//! a generation counter and an in-flight call whose generation no longer
//! matches on completion is discarded, its caller receiving
//! [`AnalysisError::Superseded`]. `request_explanation` instead rejects while
//! another explanation is in flight, since it is only accepted from the
//! `Ready`/`Explained` (or explanation-`Errored`) states.

use fundus_abstraction::{
    ClassificationResult, CredentialProvider, ExplanationOptions, ExplanationResult, ImageAsset,
    InferenceError, InferenceService,
};
use fundus_services::{HttpInferenceService, ServiceConfig};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::ExplanationCache;
use crate::error::{AnalysisError, Result};
use crate::events::{AnalysisEvent, AnalysisPhase};
use crate::fingerprint::Fingerprint;
use crate::state::AnalysisState;

/// Capacity of the event channel; a lagging subscriber loses oldest events
/// rather than blocking orchestration.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Configuration for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Whether the hybrid explanation flow is enabled. When disabled, a
    /// successful classification carries no explanation ticket.
    #[serde(default = "default_explanations_enabled")]
    pub explanations_enabled: bool,
}

fn default_explanations_enabled() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { explanations_enabled: default_explanations_enabled() }
    }
}

/// The outcome of a successful submission.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// The classification produced by the primary call.
    pub classification: ClassificationResult,
    /// Handle for requesting an explanation of this classification. `None`
    /// when the explanation flow is disabled.
    pub explanation: Option<ExplanationTicket>,
}

/// Opaque capability to request an explanation, bound to the image and
/// classification captured when the primary call succeeded.
///
/// A ticket outlived by a newer submission or a reset is stale; redeeming it
/// yields [`AnalysisError::Superseded`].
#[derive(Debug, Clone)]
pub struct ExplanationTicket {
    image: Arc<ImageAsset>,
    classification: ClassificationResult,
    generation: u64,
    analysis_id: Uuid,
}

impl ExplanationTicket {
    /// The classification this ticket would explain.
    #[must_use]
    pub fn classification(&self) -> &ClassificationResult {
        &self.classification
    }

    /// Name of the bound image.
    #[must_use]
    pub fn image_name(&self) -> &str {
        self.image.name()
    }
}

#[derive(Debug)]
struct Binding {
    image: Arc<ImageAsset>,
    classification: ClassificationResult,
}

#[derive(Debug)]
struct Inner {
    state: AnalysisState,
    generation: u64,
    current_id: Option<Uuid>,
    bound: Option<Binding>,
    last_error: Option<AnalysisError>,
}

/// Orchestrator for the two-phase classify-then-explain flow.
///
/// Session-scoped: one instance per analysis session, with the
/// process-scoped [`ExplanationCache`] injected by the application's
/// composition root. All collaborators are injected; the orchestrator owns
/// only the progress state machine.
pub struct InferenceOrchestrator {
    service: Arc<dyn InferenceService>,
    credentials: Arc<dyn CredentialProvider>,
    cache: Arc<ExplanationCache>,
    config: OrchestratorConfig,
    inner: Mutex<Inner>,
    event_tx: broadcast::Sender<AnalysisEvent>,
}

impl std::fmt::Debug for InferenceOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceOrchestrator")
            .field("service_id", &self.service.service_id())
            .field("config", &self.config)
            .field(
                "state",
                &self.inner.try_lock().map(|inner| inner.state).unwrap_or(AnalysisState::Idle),
            )
            .finish_non_exhaustive()
    }
}

impl InferenceOrchestrator {
    /// Creates a new orchestrator over the given collaborators.
    #[must_use]
    pub fn new(
        service: Arc<dyn InferenceService>,
        credentials: Arc<dyn CredentialProvider>,
        cache: Arc<ExplanationCache>,
        config: OrchestratorConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            service,
            credentials,
            cache,
            config,
            inner: Mutex::new(Inner {
                state: AnalysisState::Idle,
                generation: 0,
                current_id: None,
                bound: None,
                last_error: None,
            }),
            event_tx,
        }
    }

    /// Convenience constructor wiring the HTTP service with a fresh cache
    /// and default orchestrator configuration.
    #[must_use]
    pub fn with_http_service(
        service_config: ServiceConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self::new(
            Arc::new(HttpInferenceService::new(service_config)),
            credentials,
            Arc::new(ExplanationCache::new()),
            OrchestratorConfig::default(),
        )
    }

    /// Subscribes to progress notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AnalysisEvent> {
        self.event_tx.subscribe()
    }

    /// The current progress state.
    pub fn state(&self) -> AnalysisState {
        self.inner.lock().expect("state lock poisoned").state
    }

    /// The classification of the currently bound image, if one succeeded.
    /// Survives a failed explanation.
    pub fn classification(&self) -> Option<ClassificationResult> {
        let inner = self.inner.lock().expect("state lock poisoned");
        inner.bound.as_ref().map(|binding| binding.classification.clone())
    }

    /// The error that moved the flow to `Errored`, if any.
    pub fn last_error(&self) -> Option<AnalysisError> {
        self.inner.lock().expect("state lock poisoned").last_error.clone()
    }

    /// The injected explanation cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<ExplanationCache> {
        &self.cache
    }

    /// Returns to `Idle`, discarding the bound image, classification, and
    /// error, and superseding any in-flight call. The explanation cache is
    /// left untouched: the cache is process-scoped, the orchestrator is
    /// session-scoped.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("state lock poisoned");
        inner.generation += 1;
        let from = inner.state;
        inner.state = AnalysisState::Idle;
        inner.bound = None;
        inner.last_error = None;
        let analysis_id = inner.current_id.take();
        drop(inner);

        info!(from = %from, "Analysis reset");
        if let Some(analysis_id) = analysis_id {
            self.emit(AnalysisEvent::StateChanged { analysis_id, from, to: AnalysisState::Idle });
        }
    }

    /// Submits an image for primary classification.
    ///
    /// On success the returned outcome carries the classification and, when
    /// the explanation flow is enabled, a ticket bound to this exact image
    /// and classification.
    ///
    /// A submission issued while another is in flight supersedes it: the
    /// older call's result is discarded and its caller receives
    /// `AnalysisError::Superseded`.
    ///
    /// # Errors
    /// Returns `AnalysisError` on an empty image, a missing credential, a
    /// failed remote call, or supersession.
    pub async fn submit(&self, image: Arc<ImageAsset>) -> Result<SubmitOutcome> {
        if image.bytes().is_empty() {
            warn!(image = %image.name(), "Rejected empty image submission");
            return Err(AnalysisError::EmptyImage(image.name().to_string()));
        }

        let analysis_id = Uuid::new_v4();
        let generation = {
            let mut inner = self.inner.lock().expect("state lock poisoned");
            inner.generation += 1;
            let generation = inner.generation;
            let from = inner.state;
            inner.state = AnalysisState::Classifying;
            inner.current_id = Some(analysis_id);
            inner.bound = None;
            inner.last_error = None;
            drop(inner);

            self.emit(AnalysisEvent::StateChanged {
                analysis_id,
                from,
                to: AnalysisState::Classifying,
            });
            self.emit(AnalysisEvent::ClassificationStarted {
                analysis_id,
                image_name: image.name().to_string(),
            });
            generation
        };

        debug!(
            %analysis_id,
            image = %image.name(),
            bytes = image.byte_length(),
            "Submitting image for classification"
        );

        let Some(token) = self.credentials.token() else {
            return Err(self.fail(
                generation,
                analysis_id,
                AnalysisPhase::Classification,
                InferenceError::AuthenticationMissing,
            ));
        };

        match self.service.classify(&image, &token).await {
            Ok(classification) => {
                let mut inner = self.inner.lock().expect("state lock poisoned");
                if inner.generation != generation {
                    debug!(%analysis_id, "Classification superseded; discarding result");
                    return Err(AnalysisError::Superseded);
                }
                let from = inner.state;
                inner.state = AnalysisState::Ready;
                inner.bound = Some(Binding {
                    image: Arc::clone(&image),
                    classification: classification.clone(),
                });
                drop(inner);

                self.emit(AnalysisEvent::StateChanged {
                    analysis_id,
                    from,
                    to: AnalysisState::Ready,
                });
                self.emit(AnalysisEvent::ClassificationReady {
                    analysis_id,
                    class_index: classification.class_index,
                    class_name: classification.class_name.clone(),
                    confidence: classification.confidence,
                });
                info!(
                    %analysis_id,
                    class = %classification.class_name,
                    confidence = classification.confidence,
                    "Classification ready"
                );

                let ticket = self.config.explanations_enabled.then(|| ExplanationTicket {
                    image,
                    classification: classification.clone(),
                    generation,
                    analysis_id,
                });
                Ok(SubmitOutcome { classification, explanation: ticket })
            }
            Err(e) => {
                Err(self.fail(generation, analysis_id, AnalysisPhase::Classification, e))
            }
        }
    }

    /// Requests a heat-map explanation for the ticket's classification.
    ///
    /// Consults the explanation cache first; a hit completes synchronously
    /// with `from_cache = true` and no network call. A miss issues the
    /// secondary remote call and stores the result, so a repeated request
    /// for the same image+options issues at most one network call.
    ///
    /// A failed explanation never invalidates the classification it was
    /// requested for.
    ///
    /// # Errors
    /// Returns `AnalysisError` on a stale ticket, an invalid state, a
    /// missing credential, or a failed remote call.
    pub async fn request_explanation(
        &self,
        ticket: &ExplanationTicket,
        options: &ExplanationOptions,
    ) -> Result<ExplanationResult> {
        let analysis_id = ticket.analysis_id;

        {
            let mut inner = self.inner.lock().expect("state lock poisoned");
            if ticket.generation != inner.generation {
                debug!(%analysis_id, "Stale explanation ticket");
                return Err(AnalysisError::Superseded);
            }
            if !inner.state.accepts_explanation_request() || inner.bound.is_none() {
                return Err(AnalysisError::InvalidState {
                    operation: "request_explanation",
                    state: inner.state,
                });
            }
            let from = inner.state;
            inner.state = AnalysisState::Explaining;
            drop(inner);

            self.emit(AnalysisEvent::StateChanged {
                analysis_id,
                from,
                to: AnalysisState::Explaining,
            });
        }

        let fingerprint = Fingerprint::derive(&ticket.image, options);
        self.emit(AnalysisEvent::ExplanationStarted {
            analysis_id,
            fingerprint: fingerprint.digest(),
        });

        if let Some(cached) = self.cache.get(&fingerprint) {
            let result = ExplanationResult {
                from_cache: true,
                source: ticket.classification.clone(),
                ..cached
            };

            let mut inner = self.inner.lock().expect("state lock poisoned");
            if ticket.generation != inner.generation {
                return Err(AnalysisError::Superseded);
            }
            let from = inner.state;
            inner.state = AnalysisState::Explained;
            inner.last_error = None;
            drop(inner);

            self.emit(AnalysisEvent::StateChanged {
                analysis_id,
                from,
                to: AnalysisState::Explained,
            });
            self.emit(AnalysisEvent::ExplanationReady { analysis_id, from_cache: true });
            debug!(%analysis_id, fingerprint = %fingerprint, "Explanation served from cache");
            return Ok(result);
        }

        let Some(token) = self.credentials.token() else {
            return Err(self.fail(
                ticket.generation,
                analysis_id,
                AnalysisPhase::Explanation,
                InferenceError::AuthenticationMissing,
            ));
        };

        match self.service.explain(&ticket.image, options, &token).await {
            Ok(artifact) => {
                let result =
                    ExplanationResult::from_artifact(artifact, ticket.classification.clone());
                // The cache write stands even if this call was superseded
                // while in flight
                self.cache.put(fingerprint.clone(), result.clone());

                let mut inner = self.inner.lock().expect("state lock poisoned");
                if ticket.generation != inner.generation {
                    debug!(%analysis_id, "Explanation superseded; result cached but discarded");
                    return Err(AnalysisError::Superseded);
                }
                let from = inner.state;
                inner.state = AnalysisState::Explained;
                inner.last_error = None;
                drop(inner);

                self.emit(AnalysisEvent::StateChanged {
                    analysis_id,
                    from,
                    to: AnalysisState::Explained,
                });
                self.emit(AnalysisEvent::ExplanationReady { analysis_id, from_cache: false });
                info!(
                    %analysis_id,
                    fingerprint = %fingerprint,
                    millis = result.generation_millis,
                    "Explanation computed and cached"
                );
                Ok(result)
            }
            Err(e) => {
                Err(self.fail(ticket.generation, analysis_id, AnalysisPhase::Explanation, e))
            }
        }
    }

    /// Records a phase failure and moves the flow to `Errored`, unless a
    /// newer submission already superseded this call. A classification
    /// failure leaves no binding; an explanation failure leaves the bound
    /// classification intact.
    fn fail(
        &self,
        generation: u64,
        analysis_id: Uuid,
        phase: AnalysisPhase,
        error: InferenceError,
    ) -> AnalysisError {
        let mut inner = self.inner.lock().expect("state lock poisoned");
        if inner.generation != generation {
            return AnalysisError::Superseded;
        }
        let from = inner.state;
        inner.state = AnalysisState::Errored;
        let analysis_error = match phase {
            AnalysisPhase::Classification => AnalysisError::Classification(error),
            AnalysisPhase::Explanation => AnalysisError::Explanation(error),
        };
        inner.last_error = Some(analysis_error.clone());
        drop(inner);

        warn!(%analysis_id, ?phase, error = %analysis_error, "Analysis phase failed");
        self.emit(AnalysisEvent::StateChanged { analysis_id, from, to: AnalysisState::Errored });
        self.emit(AnalysisEvent::AnalysisFailed {
            analysis_id,
            phase,
            message: analysis_error.to_string(),
        });
        analysis_error
    }

    fn emit(&self, event: AnalysisEvent) {
        let _ = self.event_tx.send(event);
    }
}
