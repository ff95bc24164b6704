//! Vision-model provider abstraction and the Gemini REST client.
//!
//! Detector steps talk to the model through the [`VisionModel`] trait so
//! tests can script replies; production wiring uses [`GeminiClient`].

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// Provider failure modes; all recoverable at the step level.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("missing API credential: set GOOGLE_API_KEY or GEMINI_API_KEY")]
    MissingCredential,

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned status {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("provider response contained no text")]
    EmptyResponse,
}

/// Image attachment for a model request.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl ImagePayload {
    /// Wrap raw bytes, sniffing the MIME type from the container magic.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let mime_type = sniff_mime(&data).to_string();
        Self { mime_type, data }
    }
}

/// Best-effort MIME sniff from container magic; PNG when unknown.
fn sniff_mime(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::WebP) => "image/webp",
        Ok(ImageFormat::Gif) => "image/gif",
        Ok(ImageFormat::Tiff) => "image/tiff",
        Ok(ImageFormat::Bmp) => "image/bmp",
        _ => "image/png",
    }
}

/// One generation request: an optional system instruction, a user prompt,
/// and an optional image attachment.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub image: Option<ImagePayload>,
}

impl ModelRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            image: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_image(mut self, image: ImagePayload) -> Self {
        self.image = Some(image);
        self
    }
}

/// A multimodal text-generation backend.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Generate a text reply for the request.
    async fn generate(&self, request: ModelRequest) -> Result<String, ProviderError>;

    /// Identifier of the underlying model, for result metadata.
    fn model_name(&self) -> &str;
}

/// Default Gemini model when `FORGESIGHT_MODEL` is not set.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Connection settings for the Gemini REST API.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub request_timeout: Duration,
}

impl ProviderConfig {
    /// Read settings from the environment.
    ///
    /// `GOOGLE_API_KEY` (fallback `GEMINI_API_KEY`) must be present;
    /// `FORGESIGHT_MODEL` overrides the default model. The request timeout
    /// sits below the runner's per-step backstop so steps normally fail on
    /// their own terms.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = first_non_empty_env(&["GOOGLE_API_KEY", "GEMINI_API_KEY"])
            .ok_or(ProviderError::MissingCredential)?;
        let model = first_non_empty_env(&["FORGESIGHT_MODEL"])
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Ok(Self {
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(30),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// First environment variable from `names` with a non-blank value.
pub(crate) fn first_non_empty_env(names: &[&str]) -> Option<String> {
    for name in names {
        if let Ok(value) = std::env::var(name) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// Gemini `generateContent` client.
///
/// Images travel inline as base64; the API key travels in a header, never
/// in the URL. Generation is pinned to temperature 0 so detector output
/// stays as reproducible as the provider allows.
pub struct GeminiClient {
    http: reqwest::Client,
    config: ProviderConfig,
}

impl GeminiClient {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    fn build_payload(request: &ModelRequest) -> Value {
        let mut parts = vec![json!({"text": request.prompt})];
        if let Some(image) = &request.image {
            parts.push(json!({
                "inline_data": {
                    "mime_type": image.mime_type,
                    "data": BASE64.encode(&image.data),
                }
            }));
        }

        let mut payload = json!({
            "contents": [{"parts": parts}],
            "generation_config": {
                "temperature": 0.0,
                "max_output_tokens": 4096,
            },
        });
        if let Some(system) = &request.system {
            payload["system_instruction"] = json!({"parts": [{"text": system}]});
        }
        payload
    }
}

#[async_trait]
impl VisionModel for GeminiClient {
    async fn generate(&self, request: ModelRequest) -> Result<String, ProviderError> {
        let payload = Self::build_payload(&request);
        debug!(
            model = %self.config.model,
            has_image = request.image.is_some(),
            "dispatching generation request"
        );

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "provider rejected the request");
            return Err(ProviderError::BadStatus {
                status: status.as_u16(),
                body: clip(&body, 512),
            });
        }

        let parsed: Value = response.json().await?;
        extract_reply_text(&parsed).ok_or(ProviderError::EmptyResponse)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Concatenated candidate text from a `generateContent` response.
fn extract_reply_text(response: &Value) -> Option<String> {
    let parts = response
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n");
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Clip an error body for logs and messages, respecting char boundaries.
fn clip(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
