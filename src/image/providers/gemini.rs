//! Gemini (Google) image generation client.

use crate::credential::Credential;
use crate::error::{sanitize_error_message, PortraitVizError, Result, INVALID_KEY_MARKER};
use crate::image::provider::ImageGenerator;
use crate::image::types::EncodedImage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Default Gemini REST endpoint.
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini image model variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeminiModel {
    /// Nano Banana - Gemini 2.5 Flash Image (fast, economical).
    #[default]
    #[serde(rename = "gemini-2.5-flash-image")]
    NanoBanana,
    /// Nano Banana Pro - Gemini 3 Pro Image (highest quality).
    #[serde(rename = "nano-banana-pro-preview")]
    NanoBananaPro,
}

impl GeminiModel {
    /// Returns the API model identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NanoBanana => "gemini-2.5-flash-image",
            Self::NanoBananaPro => "nano-banana-pro-preview",
        }
    }
}

/// Builder for [`GeminiClient`].
#[derive(Debug, Clone, Default)]
pub struct GeminiClientBuilder {
    model: GeminiModel,
    api_base: Option<String>,
    client: Option<reqwest::Client>,
}

impl GeminiClientBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the Gemini model variant.
    pub fn model(mut self, model: GeminiModel) -> Self {
        self.model = model;
        self
    }

    /// Overrides the API base URL (proxies, tests).
    pub fn api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = Some(base.into());
        self
    }

    /// Uses an existing HTTP client.
    pub fn client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Builds the client.
    pub fn build(self) -> GeminiClient {
        GeminiClient {
            client: self.client.unwrap_or_default(),
            api_base: self
                .api_base
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: self.model,
        }
    }
}

/// Gemini image generation client.
///
/// The API key is supplied per call rather than held by the client, so a key
/// re-entered mid-session takes effect on the next batch.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    api_base: String,
    model: GeminiModel,
}

impl GeminiClient {
    /// Creates a new `GeminiClientBuilder`.
    pub fn builder() -> GeminiClientBuilder {
        GeminiClientBuilder::new()
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.api_base,
            self.model.as_str()
        )
    }

    async fn generate_impl(
        &self,
        credential: &Credential,
        image: &EncodedImage,
        instruction: &str,
        temperature: f32,
    ) -> Result<EncodedImage> {
        let start = Instant::now();
        let body = GeminiRequest::new(image, instruction, temperature);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", credential.expose())
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(parse_error(status.as_u16(), &text));
        }

        let gemini_response: GeminiResponse = response.json().await?;
        let generated = extract_image(gemini_response)?;

        tracing::debug!(
            model = self.model.as_str(),
            mime_type = %generated.mime_type,
            duration_ms = start.elapsed().as_millis() as u64,
            "Gemini generation complete"
        );
        Ok(generated)
    }
}

#[async_trait]
impl ImageGenerator for GeminiClient {
    async fn generate(
        &self,
        credential: &Credential,
        image: &EncodedImage,
        instruction: &str,
        temperature: f32,
    ) -> Result<EncodedImage> {
        if credential.is_empty() {
            return Err(PortraitVizError::MissingCredential);
        }

        self.generate_impl(credential, image, instruction, temperature)
            .await
            .map_err(classify_credential_error)
    }

    fn model(&self) -> &str {
        self.model.as_str()
    }
}

/// Re-raises any failure that mentions a rejected key as `InvalidCredential`.
fn classify_credential_error(err: PortraitVizError) -> PortraitVizError {
    if err.requires_credential() {
        return err;
    }
    let message = err.to_string();
    if message.contains(INVALID_KEY_MARKER) {
        PortraitVizError::InvalidCredential(message)
    } else {
        err
    }
}

fn parse_error(status: u16, text: &str) -> PortraitVizError {
    let text = sanitize_error_message(text);
    if text.contains(INVALID_KEY_MARKER) || status == 401 || status == 403 {
        return PortraitVizError::InvalidCredential(text);
    }
    if status == 404 {
        return PortraitVizError::Api {
            status,
            message: "Model not found. Verify the model name is correct.".into(),
        };
    }
    let lower = text.to_lowercase();
    if lower.contains("safety") || lower.contains("blocked") || lower.contains("prohibited") {
        return PortraitVizError::ContentBlocked(text);
    }
    PortraitVizError::Api {
        status,
        message: text,
    }
}

/// Picks the first inline image out of a response.
fn extract_image(response: GeminiResponse) -> Result<EncodedImage> {
    // Blocked prompts still come back as HTTP 200
    if let Some(feedback) = response.prompt_feedback {
        if let Some(reason) = feedback.block_reason {
            let msg = feedback
                .block_reason_message
                .unwrap_or_else(|| format!("Prompt blocked: {reason}"));
            return Err(PortraitVizError::ContentBlocked(msg));
        }
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(PortraitVizError::NoImageReturned(None));
    };

    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
    let mut texts = Vec::new();
    for part in parts {
        if let Some(inline) = part.inline_data {
            return Ok(EncodedImage::new(inline.data, inline.mime_type));
        }
        if let Some(text) = part.text {
            let text = text.trim();
            if !text.is_empty() {
                texts.push(text.to_string());
            }
        }
    }

    if texts.is_empty() {
        tracing::debug!(
            finish_reason = candidate.finish_reason.as_deref().unwrap_or("none"),
            "Gemini returned neither image nor text"
        );
        return Err(PortraitVizError::NoImageReturned(None));
    }

    Err(PortraitVizError::NoImageReturned(Some(texts.join(" "))))
}

// Request/Response types
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiRequestPart>,
}

/// A part in a Gemini request - can be text or inline image data.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiRequestPart {
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text {
        text: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiConfig {
    response_modalities: Vec<String>,
    temperature: f32,
}

impl GeminiRequest {
    fn new(image: &EncodedImage, instruction: &str, temperature: f32) -> Self {
        let parts = vec![
            GeminiRequestPart::InlineData {
                inline_data: InlineData {
                    mime_type: image.mime_type.clone(),
                    data: image.data.clone(),
                },
            },
            GeminiRequestPart::Text {
                text: instruction.to_string(),
            },
        ];

        Self {
            contents: vec![GeminiContent { parts }],
            generation_config: GeminiConfig {
                response_modalities: vec!["IMAGE".to_string(), "TEXT".to_string()],
                temperature,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContentResponse>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
    #[serde(default)]
    block_reason_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPartResponse {
    #[serde(default)]
    inline_data: Option<InlineData>,
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> GeminiResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_gemini_model_as_str() {
        assert_eq!(GeminiModel::NanoBanana.as_str(), "gemini-2.5-flash-image");
        assert_eq!(
            GeminiModel::NanoBananaPro.as_str(),
            "nano-banana-pro-preview"
        );
        assert_eq!(GeminiModel::default(), GeminiModel::NanoBanana);
    }

    #[test]
    fn test_builder_endpoint() {
        let client = GeminiClient::builder()
            .api_base("http://localhost:8080/v1beta/")
            .model(GeminiModel::NanoBananaPro)
            .build();
        assert_eq!(
            client.endpoint(),
            "http://localhost:8080/v1beta/models/nano-banana-pro-preview:generateContent"
        );
        assert_eq!(client.model(), "nano-banana-pro-preview");
    }

    #[test]
    fn test_request_construction() {
        let image = EncodedImage::new("aGVsbG8=", "image/jpeg");
        let req = GeminiRequest::new(&image, "extreme close-up of faces", 0.4);
        let json = serde_json::to_value(&req).unwrap();

        let parts = json["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(parts[0]["inlineData"]["data"], "aGVsbG8=");
        assert_eq!(parts[1]["text"], "extreme close-up of faces");

        let config = &json["generationConfig"];
        assert_eq!(config["responseModalities"], serde_json::json!(["IMAGE", "TEXT"]));
        let temperature = config["temperature"].as_f64().unwrap();
        assert!((temperature - 0.4).abs() < 1e-6);
        assert!(json.get("generation_config").is_none());
    }

    #[test]
    fn test_extract_image_after_text_part() {
        let resp = parse(
            r#"{
                "candidates": [{
                    "content": {
                        "parts": [
                            {"text": "Here is your image"},
                            {"inlineData": {"mimeType": "image/png", "data": "iVBORw0KGgo="}}
                        ]
                    },
                    "finishReason": "STOP"
                }]
            }"#,
        );
        let image = extract_image(resp).unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.data, "iVBORw0KGgo=");
    }

    #[test]
    fn test_extract_text_only_is_no_image_with_detail() {
        let resp = parse(
            r#"{
                "candidates": [{
                    "content": {"parts": [{"text": "I can't edit photos of real people."}]}
                }]
            }"#,
        );
        match extract_image(resp) {
            Err(PortraitVizError::NoImageReturned(Some(text))) => {
                assert_eq!(text, "I can't edit photos of real people.")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_extract_empty_is_no_image_without_detail() {
        let resp = parse(r#"{"candidates": [{"content": {"parts": [{}]}}]}"#);
        assert!(matches!(
            extract_image(resp),
            Err(PortraitVizError::NoImageReturned(None))
        ));

        let resp = parse(r#"{"candidates": []}"#);
        assert!(matches!(
            extract_image(resp),
            Err(PortraitVizError::NoImageReturned(None))
        ));
    }

    #[test]
    fn test_extract_prompt_block() {
        let resp = parse(
            r#"{
                "candidates": [],
                "promptFeedback": {
                    "blockReason": "SAFETY",
                    "blockReasonMessage": "Prompt was blocked due to safety"
                }
            }"#,
        );
        match extract_image(resp) {
            Err(PortraitVizError::ContentBlocked(msg)) => {
                assert_eq!(msg, "Prompt was blocked due to safety")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_extract_safety_finish_reason_without_parts() {
        let resp = parse(r#"{"candidates": [{"finishReason": "IMAGE_SAFETY"}]}"#);
        assert!(matches!(
            extract_image(resp),
            Err(PortraitVizError::NoImageReturned(None))
        ));
    }

    #[test]
    fn test_parse_error_invalid_key() {
        let body = r#"{"error": {"code": 400, "message": "API key not valid. Please pass a valid API key.", "status": "INVALID_ARGUMENT"}}"#;
        let err = parse_error(400, body);
        assert!(err.is_credential_error());

        assert!(parse_error(403, "forbidden").is_credential_error());
    }

    #[test]
    fn test_parse_error_other() {
        assert!(matches!(
            parse_error(500, "internal"),
            PortraitVizError::Api { status: 500, .. }
        ));
        assert!(matches!(
            parse_error(400, "request blocked by safety settings"),
            PortraitVizError::ContentBlocked(_)
        ));
    }

    #[test]
    fn test_classify_credential_error() {
        let err = classify_credential_error(PortraitVizError::Api {
            status: 400,
            message: "API key not valid. Please pass a valid API key.".into(),
        });
        assert!(err.is_credential_error());

        let err = classify_credential_error(PortraitVizError::NoImageReturned(None));
        assert!(!err.is_credential_error());
    }

    #[tokio::test]
    async fn test_empty_credential_fails_before_network() {
        // nothing listens on the discard port; a network attempt would be a Network error
        let client = GeminiClient::builder()
            .api_base("http://127.0.0.1:9")
            .build();
        let image = EncodedImage::new("aGVsbG8=", "image/png");
        let err = client
            .generate(&Credential::new(""), &image, "medium shot", 0.4)
            .await
            .unwrap_err();
        assert!(matches!(err, PortraitVizError::MissingCredential));
    }
}
