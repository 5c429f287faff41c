//! Inference abstraction layer for Fundus.
//!
//! This crate defines the value objects, error taxonomy, and traits shared by
//! the transport implementations and the orchestration layer. It performs no
//! I/O of its own.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Represents an error surfaced by a single remote inference call.
///
/// Every variant is attributed to the call that produced it by the layer
/// above; the transport itself only reports what happened on the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InferenceError {
    /// No credential was available at call time. Terminal for the current
    /// call; the core never waits for a credential to appear.
    #[error("no credential available for the inference service")]
    AuthenticationMissing,

    /// Network or connection-level failure, including a bounded wait that
    /// expired before the service responded.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The service responded with a non-success status.
    #[error("inference service returned status {status}: {message}")]
    RemoteError {
        /// HTTP status code reported by the service.
        status: u16,
        /// Response body or reason phrase, verbatim.
        message: String,
    },

    /// The service responded with a payload missing required fields.
    #[error("malformed inference response: {0}")]
    MalformedResponse(String),
}

/// An uploaded retinal photograph, immutable once received.
///
/// Identity for caching purposes is derived from `name`, `byte_length`, and
/// `last_modified_ms` rather than stored separately; two assets with identical
/// derived fields are treated as the same logical image even if their bytes
/// differ. This weak-identity policy is part of the contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    name: String,
    bytes: Vec<u8>,
    last_modified_ms: i64,
}

impl ImageAsset {
    /// Creates a new asset from an upload payload.
    ///
    /// # Arguments
    /// * `name` - The source-reported file name
    /// * `bytes` - The raw image payload
    /// * `last_modified_ms` - Source-reported modification time, epoch millis
    #[must_use]
    pub fn new(name: impl Into<String>, bytes: Vec<u8>, last_modified_ms: i64) -> Self {
        Self { name: name.into(), bytes, last_modified_ms }
    }

    /// The source-reported file name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw image payload.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn byte_length(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Source-reported modification time in epoch milliseconds.
    #[must_use]
    pub fn last_modified_ms(&self) -> i64 {
        self.last_modified_ms
    }
}

/// Options controlling how an explanation is rendered by the service.
///
/// Participates in the cache fingerprint: the same image requested with
/// different options is a different cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExplanationOptions {
    /// Colormap override passed to the service (e.g. "inferno"). `None` lets
    /// the service pick its default.
    pub colormap: Option<String>,
    /// Whether an overlay rendition should be requested alongside the raw
    /// heat-map.
    pub include_overlay: bool,
}

impl Default for ExplanationOptions {
    fn default() -> Self {
        Self { colormap: None, include_overlay: true }
    }
}

/// The outcome of one primary classification call. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Index of the winning class.
    pub class_index: u32,
    /// Human-readable label of the winning class (e.g. "Moderate").
    pub class_name: String,
    /// Confidence of the winning class, in `[0, 1]`.
    pub confidence: f32,
    /// Per-class probabilities, ordered by class index, summing to ~1.
    pub class_probabilities: Vec<f32>,
    /// Client-measured wall time of the primary call, in milliseconds.
    pub elapsed_millis: f64,
    /// Identifier of the model that produced the result.
    pub model_identifier: String,
    /// Optional preprocessed display rendition of the image, base64-encoded.
    pub display_image: Option<String>,
    /// Dimensions of the display rendition, if one was produced.
    pub display_image_dimensions: Option<(u32, u32)>,
}

/// The raw artifact computed by one secondary explanation call.
///
/// This is what a transport returns; the orchestration layer assembles it
/// into an [`ExplanationResult`] together with the classification it explains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationArtifact {
    /// Heat-map rendition, base64-encoded.
    pub heatmap: String,
    /// Optional heat-map-over-image overlay, base64-encoded.
    pub heatmap_overlay: Option<String>,
    /// Optional color legend as an SVG document.
    pub color_legend: Option<String>,
    /// Class index the service re-derived while explaining.
    pub predicted_class: u32,
    /// Label of the re-derived class.
    pub predicted_class_name: String,
    /// Confidence the service reported for the explained prediction.
    pub confidence: f32,
    /// Confidence of the automatic retinal-mask detection, if reported.
    pub confidence_mask: Option<f32>,
    /// Service-reported quality tier of the artifact. Opaque to the core.
    pub quality_grade: String,
    /// Identifier of the model that produced the artifact.
    pub model_identifier: String,
    /// Colormap the service actually used, if reported.
    pub colormap_used: Option<String>,
    /// Client-measured wall time of the secondary call, in milliseconds.
    pub generation_millis: f64,
}

/// A fully assembled explanation, as handed to UI callers.
///
/// Owned by the explanation cache once stored; callers receive copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationResult {
    /// Heat-map rendition, base64-encoded.
    pub heatmap: String,
    /// Optional heat-map-over-image overlay, base64-encoded.
    pub heatmap_overlay: Option<String>,
    /// Optional color legend as an SVG document.
    pub color_legend: Option<String>,
    /// The classification this explanation corresponds to.
    pub source: ClassificationResult,
    /// Confidence of the automatic retinal-mask detection, if reported.
    pub confidence_mask: Option<f32>,
    /// Service-reported quality tier. Opaque to the core.
    pub quality_grade: String,
    /// Wall time of the secondary call that produced the artifact, in
    /// milliseconds. Preserved across cache hits.
    pub generation_millis: f64,
    /// Whether this result was served from the cache.
    pub from_cache: bool,
}

impl ExplanationResult {
    /// Assembles a result from a freshly computed artifact and the
    /// classification it explains. `from_cache` starts out `false`.
    #[must_use]
    pub fn from_artifact(artifact: ExplanationArtifact, source: ClassificationResult) -> Self {
        Self {
            heatmap: artifact.heatmap,
            heatmap_overlay: artifact.heatmap_overlay,
            color_legend: artifact.color_legend,
            source,
            confidence_mask: artifact.confidence_mask,
            quality_grade: artifact.quality_grade,
            generation_millis: artifact.generation_millis,
            from_cache: false,
        }
    }

    /// Decodes the heat-map payload into raw bytes.
    ///
    /// # Errors
    /// Returns `InferenceError::MalformedResponse` if the payload is not
    /// valid base64.
    pub fn heatmap_bytes(&self) -> Result<Vec<u8>, InferenceError> {
        BASE64
            .decode(&self.heatmap)
            .map_err(|e| InferenceError::MalformedResponse(format!("heatmap is not base64: {e}")))
    }

    /// Decodes the overlay payload into raw bytes, if one is present.
    ///
    /// # Errors
    /// Returns `InferenceError::MalformedResponse` if the payload is not
    /// valid base64.
    pub fn heatmap_overlay_bytes(&self) -> Result<Option<Vec<u8>>, InferenceError> {
        self.heatmap_overlay
            .as_deref()
            .map(|payload| {
                BASE64.decode(payload).map_err(|e| {
                    InferenceError::MalformedResponse(format!("overlay is not base64: {e}"))
                })
            })
            .transpose()
    }
}

/// Read-only source of the caller's bearer credential.
///
/// Absence of a credential is reported as-is; the core treats it as a
/// terminal error for the current call rather than waiting for one to appear.
pub trait CredentialProvider: Send + Sync {
    /// Returns the current bearer token, if any.
    fn token(&self) -> Option<String>;
}

/// A `CredentialProvider` backed by a fixed token, for embedding contexts
/// that resolve the credential once per session.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialProvider {
    token: Option<String>,
}

impl StaticCredentialProvider {
    /// Creates a provider that always returns the given token.
    #[must_use]
    pub fn with_token(token: impl Into<String>) -> Self {
        Self { token: Some(token.into()) }
    }

    /// Creates a provider with no credential.
    #[must_use]
    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// A remote inference compute service.
///
/// Implementations perform exactly one network call per method invocation and
/// never retry; retry/backoff policy belongs to the embedding application.
/// All implementations must be `Send + Sync` to allow concurrent use across
/// threads.
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Submits an image for primary classification.
    ///
    /// # Arguments
    /// * `image` - The image to classify
    /// * `token` - Bearer credential for the service
    ///
    /// # Errors
    /// Returns an `InferenceError` describing the transport, status, or
    /// payload failure.
    async fn classify(
        &self,
        image: &ImageAsset,
        token: &str,
    ) -> Result<ClassificationResult, InferenceError>;

    /// Requests a heat-map explanation for an image.
    ///
    /// Implementations enforce a bounded wait on this call and surface an
    /// expired wait as `TransportFailure`.
    ///
    /// # Arguments
    /// * `image` - The image to explain
    /// * `options` - Rendering options forwarded to the service
    /// * `token` - Bearer credential for the service
    ///
    /// # Errors
    /// Returns an `InferenceError` describing the transport, status, or
    /// payload failure.
    async fn explain(
        &self,
        image: &ImageAsset,
        options: &ExplanationOptions,
        token: &str,
    ) -> Result<ExplanationArtifact, InferenceError>;

    /// Returns the identifier of the service.
    fn service_id(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_classification() -> ClassificationResult {
        ClassificationResult {
            class_index: 2,
            class_name: "Moderate".to_string(),
            confidence: 0.81,
            class_probabilities: vec![0.05, 0.04, 0.81, 0.07, 0.03],
            elapsed_millis: 120.0,
            model_identifier: "retina-efficientnet-v2".to_string(),
            display_image: None,
            display_image_dimensions: None,
        }
    }

    #[test]
    fn test_image_asset_accessors() {
        let asset = ImageAsset::new("fondo.jpg", vec![1, 2, 3], 1000);
        assert_eq!(asset.name(), "fondo.jpg");
        assert_eq!(asset.byte_length(), 3);
        assert_eq!(asset.last_modified_ms(), 1000);
    }

    #[test]
    fn test_explanation_options_default() {
        let options = ExplanationOptions::default();
        assert!(options.colormap.is_none());
        assert!(options.include_overlay);
    }

    #[test]
    fn test_from_artifact_starts_uncached() {
        let artifact = ExplanationArtifact {
            heatmap: BASE64.encode(b"heatmap-png"),
            heatmap_overlay: None,
            color_legend: None,
            predicted_class: 2,
            predicted_class_name: "Moderate".to_string(),
            confidence: 0.81,
            confidence_mask: Some(0.95),
            quality_grade: "clinical".to_string(),
            model_identifier: "retina-efficientnet-v2".to_string(),
            colormap_used: Some("inferno".to_string()),
            generation_millis: 900.0,
        };

        let result = ExplanationResult::from_artifact(artifact, sample_classification());
        assert!(!result.from_cache);
        assert_eq!(result.source.class_index, 2);
        assert_eq!(result.heatmap_bytes().unwrap(), b"heatmap-png");
        assert_eq!(result.heatmap_overlay_bytes().unwrap(), None);
    }

    #[test]
    fn test_heatmap_bytes_rejects_invalid_base64() {
        let artifact = ExplanationArtifact {
            heatmap: "not base64!!!".to_string(),
            heatmap_overlay: None,
            color_legend: None,
            predicted_class: 0,
            predicted_class_name: "No DR".to_string(),
            confidence: 0.9,
            confidence_mask: None,
            quality_grade: "standard".to_string(),
            model_identifier: "retina-efficientnet-v2".to_string(),
            colormap_used: None,
            generation_millis: 10.0,
        };

        let result = ExplanationResult::from_artifact(artifact, sample_classification());
        assert!(matches!(result.heatmap_bytes(), Err(InferenceError::MalformedResponse(_))));
    }

    #[test]
    fn test_static_credential_provider() {
        assert_eq!(
            StaticCredentialProvider::with_token("secret").token(),
            Some("secret".to_string())
        );
        assert_eq!(StaticCredentialProvider::anonymous().token(), None);
    }
}
