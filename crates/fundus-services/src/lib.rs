//! Inference service implementations for Fundus.
//!
//! This crate provides concrete implementations of the `InferenceService`
//! trait.
//!
//! # Supported services
//!
//! - **Mock**: scripted outcomes for testing and offline development
//! - **Http**: the remote compute service (multipart HTTP, bearer auth)

pub mod config;
pub mod http;

use async_trait::async_trait;
use fundus_abstraction::{
    ClassificationResult, ExplanationArtifact, ExplanationOptions, ImageAsset, InferenceError,
    InferenceService,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::debug;

pub use config::{ServiceConfig, ServiceConfigError};
pub use http::HttpInferenceService;

/// A mock implementation of the `InferenceService` trait for testing.
///
/// Outcomes can be scripted per call with [`push_classify`] and
/// [`push_explain`]; with an empty script each call returns a deterministic
/// canned success. Call counters let tests assert how many service calls a
/// flow actually issued, and [`hold_next_classify`] parks the next
/// classification until the test releases it, so overlapping submissions can
/// be arranged deterministically.
///
/// [`push_classify`]: MockInferenceService::push_classify
/// [`push_explain`]: MockInferenceService::push_explain
/// [`hold_next_classify`]: MockInferenceService::hold_next_classify
#[derive(Debug, Default)]
pub struct MockInferenceService {
    id: String,
    classify_calls: AtomicUsize,
    explain_calls: AtomicUsize,
    classify_script: Mutex<VecDeque<Result<ClassificationResult, InferenceError>>>,
    explain_script: Mutex<VecDeque<Result<ExplanationArtifact, InferenceError>>>,
    classify_gate: Mutex<Option<Arc<Notify>>>,
    explain_gate: Mutex<Option<Arc<Notify>>>,
}

impl MockInferenceService {
    /// Creates a new `MockInferenceService` with the given ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Self::default() }
    }

    /// Queues the outcome of the next unscripted classification call.
    pub fn push_classify(&self, outcome: Result<ClassificationResult, InferenceError>) {
        self.classify_script.lock().expect("script lock poisoned").push_back(outcome);
    }

    /// Queues the outcome of the next unscripted explanation call.
    pub fn push_explain(&self, outcome: Result<ExplanationArtifact, InferenceError>) {
        self.explain_script.lock().expect("script lock poisoned").push_back(outcome);
    }

    /// Number of classification calls issued so far.
    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }

    /// Number of explanation calls issued so far.
    pub fn explain_calls(&self) -> usize {
        self.explain_calls.load(Ordering::SeqCst)
    }

    /// Parks the next classification call until the returned handle is
    /// notified.
    pub fn hold_next_classify(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.classify_gate.lock().expect("gate lock poisoned") = Some(Arc::clone(&gate));
        gate
    }

    /// Parks the next explanation call until the returned handle is notified.
    pub fn hold_next_explain(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.explain_gate.lock().expect("gate lock poisoned") = Some(Arc::clone(&gate));
        gate
    }

    fn canned_classification(image: &ImageAsset) -> ClassificationResult {
        ClassificationResult {
            class_index: 2,
            class_name: "Moderate".to_string(),
            confidence: 0.81,
            class_probabilities: vec![0.05, 0.04, 0.81, 0.07, 0.03],
            elapsed_millis: 1.0,
            // Distinguishable per image in assertions
            model_identifier: format!("mock-model/{}", image.name()),
            display_image: None,
            display_image_dimensions: None,
        }
    }

    fn canned_artifact(options: &ExplanationOptions) -> ExplanationArtifact {
        ExplanationArtifact {
            heatmap: "aGVhdG1hcA==".to_string(),
            heatmap_overlay: options.include_overlay.then(|| "b3ZlcmxheQ==".to_string()),
            color_legend: Some("<svg/>".to_string()),
            predicted_class: 2,
            predicted_class_name: "Moderate".to_string(),
            confidence: 0.81,
            confidence_mask: Some(0.95),
            quality_grade: "clinical".to_string(),
            model_identifier: "mock-model".to_string(),
            colormap_used: options.colormap.clone(),
            generation_millis: 1.0,
        }
    }
}

#[async_trait]
impl InferenceService for MockInferenceService {
    async fn classify(
        &self,
        image: &ImageAsset,
        _token: &str,
    ) -> Result<ClassificationResult, InferenceError> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        debug!(service_id = %self.id, image = %image.name(), "MockInferenceService classifying");

        let gate = self.classify_gate.lock().expect("gate lock poisoned").take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let scripted = self.classify_script.lock().expect("script lock poisoned").pop_front();
        scripted.unwrap_or_else(|| Ok(Self::canned_classification(image)))
    }

    async fn explain(
        &self,
        image: &ImageAsset,
        options: &ExplanationOptions,
        _token: &str,
    ) -> Result<ExplanationArtifact, InferenceError> {
        self.explain_calls.fetch_add(1, Ordering::SeqCst);
        debug!(service_id = %self.id, image = %image.name(), "MockInferenceService explaining");

        let gate = self.explain_gate.lock().expect("gate lock poisoned").take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let scripted = self.explain_script.lock().expect("script lock poisoned").pop_front();
        scripted.unwrap_or_else(|| Ok(Self::canned_artifact(options)))
    }

    fn service_id(&self) -> &str {
        &self.id
    }
}
