//! HTTP implementation of the inference service.
//!
//! Performs one multipart-form POST per call against the remote compute
//! service: the primary classification endpoint and the secondary Grad-CAM
//! explanation endpoint, both under a configured base path and both carrying
//! a bearer `Authorization` header.

use async_trait::async_trait;
use fundus_abstraction::{
    ClassificationResult, ExplanationArtifact, ExplanationOptions, ImageAsset, InferenceError,
    InferenceService,
};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::time::Instant;
use tracing::{debug, error};

use crate::config::ServiceConfig;

/// Inference service backed by the remote HTTP compute endpoints.
#[derive(Debug, Clone)]
pub struct HttpInferenceService {
    /// Service endpoints and timeout configuration.
    config: ServiceConfig,
    /// HTTP client for making requests.
    client: Client,
}

impl HttpInferenceService {
    /// Creates a new service for the given configuration.
    #[must_use]
    pub fn new(config: ServiceConfig) -> Self {
        Self { config, client: Client::new() }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Builds the multipart form shared by both calls: the image payload
    /// under the `imagen` field with its original filename and MIME type.
    fn image_form(image: &ImageAsset) -> Result<Form, InferenceError> {
        let part = Part::bytes(image.bytes().to_vec())
            .file_name(image.name().to_string())
            .mime_str(mime_for_name(image.name()))
            .map_err(|e| InferenceError::TransportFailure(format!("invalid MIME type: {e}")))?;
        Ok(Form::new().part("imagen", part))
    }

    /// Checks the status and decodes the body into `T`, mapping each failure
    /// mode onto the error taxonomy.
    async fn decode_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        call: &str,
    ) -> Result<T, InferenceError> {
        let status = response.status();
        let body = response.text().await.map_err(|e| {
            error!(call, error = %e, "Failed to read inference response body");
            InferenceError::TransportFailure(format!("failed to read response: {e}"))
        })?;

        if !status.is_success() {
            error!(call, status = %status, body = %body, "Inference service returned error status");
            return Err(InferenceError::RemoteError { status: status.as_u16(), message: body });
        }

        serde_json::from_str(&body).map_err(|e| {
            error!(call, error = %e, "Failed to parse inference response");
            InferenceError::MalformedResponse(format!("{call}: {e}"))
        })
    }

    fn map_send_error(call: &str, e: &reqwest::Error) -> InferenceError {
        error!(call, error = %e, "Failed to reach inference service");
        if e.is_timeout() {
            InferenceError::TransportFailure(format!("{call} timed out"))
        } else {
            InferenceError::TransportFailure(format!("network error: {e}"))
        }
    }
}

#[async_trait]
impl InferenceService for HttpInferenceService {
    async fn classify(
        &self,
        image: &ImageAsset,
        token: &str,
    ) -> Result<ClassificationResult, InferenceError> {
        debug!(
            image = %image.name(),
            bytes = image.byte_length(),
            "Submitting image for classification"
        );

        let started = Instant::now();
        let response = self
            .client
            .post(self.endpoint(&self.config.predict_path))
            .bearer_auth(token)
            .multipart(Self::image_form(image)?)
            .send()
            .await
            .map_err(|e| Self::map_send_error("classification", &e))?;

        let payload: PredictResponse = Self::decode_response(response, "classification").await?;
        let elapsed_millis = started.elapsed().as_secs_f64() * 1000.0;

        debug!(
            image = %image.name(),
            class = payload.clase,
            confidence = payload.confianza,
            elapsed_millis,
            "Classification completed"
        );

        Ok(ClassificationResult {
            class_index: payload.clase,
            class_name: payload.nombre_clase,
            confidence: payload.confianza,
            class_probabilities: payload.probabilidades,
            elapsed_millis,
            model_identifier: payload.modelo_usado,
            display_image: payload.imagen_display,
            display_image_dimensions: payload.imagen_size,
        })
    }

    async fn explain(
        &self,
        image: &ImageAsset,
        options: &ExplanationOptions,
        token: &str,
    ) -> Result<ExplanationArtifact, InferenceError> {
        debug!(
            image = %image.name(),
            colormap = ?options.colormap,
            "Requesting heat-map explanation"
        );

        let mut form = Self::image_form(image)?;
        if let Some(colormap) = &options.colormap {
            form = form.text("colormap", colormap.clone());
        }
        form = form.text("overlay", if options.include_overlay { "true" } else { "false" });

        let started = Instant::now();
        let response = self
            .client
            .post(self.endpoint(&self.config.explain_path))
            .bearer_auth(token)
            .timeout(self.config.explain_timeout())
            .multipart(form)
            .send()
            .await
            .map_err(|e| Self::map_send_error("explanation", &e))?;

        let payload: GradcamResponse = Self::decode_response(response, "explanation").await?;
        let generation_millis = started.elapsed().as_secs_f64() * 1000.0;

        debug!(
            image = %image.name(),
            class = payload.prediccion,
            generation_millis,
            "Explanation completed"
        );

        Ok(ExplanationArtifact {
            heatmap: payload.gradcam,
            heatmap_overlay: payload.gradcam_overlay,
            color_legend: payload.colorbar_svg,
            predicted_class: payload.prediccion,
            predicted_class_name: payload.prediccion_nombre,
            confidence: payload.confianza,
            confidence_mask: payload.mask_confidence,
            quality_grade: payload
                .medical_grade
                .or(payload.quality)
                .unwrap_or_else(|| "standard".to_string()),
            model_identifier: payload.modelo_usado,
            colormap_used: payload.colormap_used,
            generation_millis,
        })
    }

    fn service_id(&self) -> &str {
        &self.config.base_url
    }
}

/// Picks a MIME type from the file extension, falling back to a generic
/// binary type for anything unrecognized.
fn mime_for_name(name: &str) -> &'static str {
    let extension = name.rsplit('.').next().map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("tif" | "tiff") => "image/tiff",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

// Compute service request/response structures

#[derive(Debug, serde::Deserialize)]
struct PredictResponse {
    clase: u32,
    nombre_clase: String,
    confianza: f32,
    probabilidades: Vec<f32>,
    modelo_usado: String,
    #[serde(default)]
    imagen_display: Option<String>,
    #[serde(default)]
    imagen_size: Option<(u32, u32)>,
}

#[derive(Debug, serde::Deserialize)]
struct GradcamResponse {
    gradcam: String,
    #[serde(default)]
    gradcam_overlay: Option<String>,
    #[serde(default)]
    colorbar_svg: Option<String>,
    prediccion: u32,
    prediccion_nombre: String,
    confianza: f32,
    #[serde(default)]
    mask_confidence: Option<f32>,
    #[serde(default)]
    medical_grade: Option<String>,
    #[serde(default)]
    quality: Option<String>,
    modelo_usado: String,
    #[serde(default)]
    colormap_used: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image() -> ImageAsset {
        ImageAsset::new("fondo.jpg", vec![0xFF, 0xD8, 0xFF, 0xE0], 1000)
    }

    fn service_for(server: &mockito::ServerGuard) -> HttpInferenceService {
        HttpInferenceService::new(ServiceConfig::new(server.url()))
    }

    #[test]
    fn test_mime_detection() {
        assert_eq!(mime_for_name("fondo.jpg"), "image/jpeg");
        assert_eq!(mime_for_name("fondo.JPEG"), "image/jpeg");
        assert_eq!(mime_for_name("scan.png"), "image/png");
        assert_eq!(mime_for_name("mystery"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_classify_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/predict/")
            .match_header("authorization", "Bearer test-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "clase": 2,
                    "nombre_clase": "Moderate",
                    "confianza": 0.81,
                    "probabilidades": [0.05, 0.04, 0.81, 0.07, 0.03],
                    "modelo_usado": "retina-efficientnet-v2",
                    "imagen_display": "aGVsbG8=",
                    "imagen_size": [224, 224]
                }"#,
            )
            .create_async()
            .await;

        let service = service_for(&server);
        let result = service.classify(&sample_image(), "test-token").await.unwrap();

        assert_eq!(result.class_index, 2);
        assert_eq!(result.class_name, "Moderate");
        assert!((result.confidence - 0.81).abs() < f32::EPSILON);
        assert_eq!(result.class_probabilities.len(), 5);
        assert_eq!(result.model_identifier, "retina-efficientnet-v2");
        assert_eq!(result.display_image_dimensions, Some((224, 224)));
        assert!(result.elapsed_millis >= 0.0);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_classify_maps_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/predict/")
            .with_status(503)
            .with_body("model warming up")
            .create_async()
            .await;

        let service = service_for(&server);
        let err = service.classify(&sample_image(), "test-token").await.unwrap_err();

        assert_eq!(
            err,
            InferenceError::RemoteError { status: 503, message: "model warming up".to_string() }
        );
    }

    #[tokio::test]
    async fn test_classify_rejects_malformed_payload() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/predict/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"clase": 2}"#)
            .create_async()
            .await;

        let service = service_for(&server);
        let err = service.classify(&sample_image(), "test-token").await.unwrap_err();

        assert!(matches!(err, InferenceError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_explain_success_with_quality_fallback() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/gradcam/")
            .match_header("authorization", "Bearer test-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "gradcam": "aGVhdG1hcA==",
                    "gradcam_overlay": "b3ZlcmxheQ==",
                    "colorbar_svg": "<svg/>",
                    "prediccion": 2,
                    "prediccion_nombre": "Moderate",
                    "confianza": 0.81,
                    "mask_confidence": 0.95,
                    "quality": "clinical",
                    "modelo_usado": "retina-efficientnet-v2",
                    "colormap_used": "inferno"
                }"#,
            )
            .create_async()
            .await;

        let service = service_for(&server);
        let options =
            ExplanationOptions { colormap: Some("inferno".to_string()), include_overlay: true };
        let artifact = service.explain(&sample_image(), &options, "test-token").await.unwrap();

        assert_eq!(artifact.predicted_class, 2);
        assert_eq!(artifact.heatmap, "aGVhdG1hcA==");
        assert_eq!(artifact.heatmap_overlay.as_deref(), Some("b3ZlcmxheQ=="));
        assert_eq!(artifact.color_legend.as_deref(), Some("<svg/>"));
        // medical_grade is absent; quality fills the grade
        assert_eq!(artifact.quality_grade, "clinical");
        assert_eq!(artifact.colormap_used.as_deref(), Some("inferno"));
        assert!(artifact.generation_millis >= 0.0);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_explain_defaults_quality_grade() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/gradcam/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "gradcam": "aGVhdG1hcA==",
                    "prediccion": 0,
                    "prediccion_nombre": "No DR",
                    "confianza": 0.93,
                    "modelo_usado": "retina-efficientnet-v2"
                }"#,
            )
            .create_async()
            .await;

        let service = service_for(&server);
        let artifact = service
            .explain(&sample_image(), &ExplanationOptions::default(), "test-token")
            .await
            .unwrap();

        assert_eq!(artifact.quality_grade, "standard");
        assert_eq!(artifact.heatmap_overlay, None);
        assert_eq!(artifact.confidence_mask, None);
    }

    #[tokio::test]
    async fn test_explain_maps_auth_rejection() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/gradcam/")
            .with_status(401)
            .with_body("credentials rejected")
            .create_async()
            .await;

        let service = service_for(&server);
        let err = service
            .explain(&sample_image(), &ExplanationOptions::default(), "stale-token")
            .await
            .unwrap_err();

        assert_eq!(
            err,
            InferenceError::RemoteError { status: 401, message: "credentials rejected".to_string() }
        );
    }
}
