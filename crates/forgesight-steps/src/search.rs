//! Reverse image search step.
//!
//! The image is hosted on Imgur to obtain a public URL, looked up through
//! SerpAPI's `google_reverse_image` engine, and the matches are handed to
//! the vision model for a provenance assessment. Either credential may be
//! absent; the step then fails on its own and the rest of the pipeline
//! carries on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use forgesight_core::{AnalysisStep, StepResult, TaskInput};

use crate::provider::{first_non_empty_env, ImagePayload, ModelRequest, VisionModel};

pub const NAME: &str = "reverse_image_search";
pub const DISPLAY_NAME: &str = "Reverse Image Search";

const SERPAPI_BASE_URL: &str = "https://serpapi.com";
const IMGUR_BASE_URL: &str = "https://api.imgur.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_MATCHES: usize = 5;

#[derive(Debug, Error)]
enum SearchError {
    #[error("reverse search credential not configured: set SERPAPI_KEY")]
    MissingKey,

    #[error("image hosting credential not configured: set IMGUR_CLIENT_ID")]
    MissingUploadId,

    #[error("image upload failed: {0}")]
    Upload(String),

    #[error("search backend error: {0}")]
    Backend(String),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("search backend returned status {0}")]
    BadStatus(u16),

    #[error("no visually similar images were found in the search index")]
    NoMatches,
}

/// Credentials and endpoints for the lookup chain.
///
/// Both credentials are optional at construction; absence surfaces as a
/// step failure at run time, not a wiring error.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub serpapi_key: Option<String>,
    pub imgur_client_id: Option<String>,
    pub serpapi_base_url: String,
    pub imgur_base_url: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            serpapi_key: None,
            imgur_client_id: None,
            serpapi_base_url: SERPAPI_BASE_URL.to_string(),
            imgur_base_url: IMGUR_BASE_URL.to_string(),
        }
    }
}

impl SearchConfig {
    /// Read `SERPAPI_KEY` and `IMGUR_CLIENT_ID` from the environment.
    pub fn from_env() -> Self {
        Self {
            serpapi_key: first_non_empty_env(&["SERPAPI_KEY"]),
            imgur_client_id: first_non_empty_env(&["IMGUR_CLIENT_ID"]),
            ..Self::default()
        }
    }

    pub fn with_serpapi_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.serpapi_base_url = base_url.into();
        self
    }

    pub fn with_imgur_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.imgur_base_url = base_url.into();
        self
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct SearchMatch {
    title: String,
    link: String,
    source: String,
}

/// What the lookup chain found: the full hit count and the capped matches.
struct Findings {
    total: usize,
    matches: Vec<SearchMatch>,
}

pub struct SearchStep {
    config: SearchConfig,
    model: Arc<dyn VisionModel>,
}

impl SearchStep {
    pub fn new(config: SearchConfig, model: Arc<dyn VisionModel>) -> Self {
        Self { config, model }
    }

    async fn lookup(&self, input: &TaskInput) -> Result<Findings, SearchError> {
        let key = self
            .config
            .serpapi_key
            .as_deref()
            .ok_or(SearchError::MissingKey)?;
        let client_id = self
            .config
            .imgur_client_id
            .as_deref()
            .ok_or(SearchError::MissingUploadId)?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let image_url =
            upload_image(&http, &self.config.imgur_base_url, client_id, &input.image).await?;
        debug!(%image_url, "image hosted for reverse lookup");

        let response = http
            .get(format!(
                "{}/search.json",
                self.config.serpapi_base_url.trim_end_matches('/')
            ))
            .query(&[
                ("engine", "google_reverse_image"),
                ("image_url", image_url.as_str()),
                ("api_key", key),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::BadStatus(status.as_u16()));
        }
        let body: Value = response.json().await?;
        if let Some(message) = body.get("error").and_then(Value::as_str) {
            return Err(SearchError::Backend(message.to_string()));
        }

        let findings = collect_matches(&body);
        if findings.matches.is_empty() {
            return Err(SearchError::NoMatches);
        }
        Ok(findings)
    }
}

#[async_trait]
impl AnalysisStep for SearchStep {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        DISPLAY_NAME
    }

    async fn run(&self, input: &TaskInput) -> StepResult {
        let findings = match self.lookup(input).await {
            Ok(findings) => findings,
            Err(e) => return StepResult::failure(NAME, e.to_string()),
        };

        let request = ModelRequest::text(provenance_prompt(&findings))
            .with_image(ImagePayload::from_bytes(input.image.clone()));
        let analysis = match self.model.generate(request).await {
            Ok(analysis) => analysis,
            Err(e) => return StepResult::failure(NAME, e.to_string()),
        };

        StepResult::success(
            NAME,
            json!({
                "num_results": findings.total,
                "top_results": findings.matches,
                "analysis": analysis.trim(),
                "model_used": self.model.model_name(),
            }),
        )
    }
}

/// Host the image and return its public URL.
async fn upload_image(
    http: &reqwest::Client,
    base_url: &str,
    client_id: &str,
    image: &[u8],
) -> Result<String, SearchError> {
    let response = http
        .post(format!("{}/3/image", base_url.trim_end_matches('/')))
        .header("Authorization", format!("Client-ID {client_id}"))
        .form(&[
            ("image", BASE64.encode(image)),
            ("type", "base64".to_string()),
        ])
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(SearchError::BadStatus(status.as_u16()));
    }
    let body: Value = response.json().await?;
    body["data"]["link"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| SearchError::Upload("hosting response had no link".to_string()))
}

/// Reduce a SerpAPI response to the capped match list plus the full count.
fn collect_matches(body: &Value) -> Findings {
    let empty = Vec::new();
    let entries = body
        .get("image_results")
        .and_then(Value::as_array)
        .unwrap_or(&empty);

    let matches = entries
        .iter()
        .take(MAX_MATCHES)
        .map(|entry| SearchMatch {
            title: entry
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("untitled")
                .to_string(),
            link: entry
                .get("link")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            source: entry
                .get("source")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
        })
        .collect();

    Findings {
        total: entries.len(),
        matches,
    }
}

fn format_matches(matches: &[SearchMatch]) -> String {
    matches
        .iter()
        .map(|m| format!("- {} ({}): {}", m.title, m.source, m.link))
        .collect::<Vec<_>>()
        .join("\n")
}

fn provenance_prompt(findings: &Findings) -> String {
    format!(
        "A reverse image search for the attached image returned {} result(s). \
         The top matches were:\n{}\n\nAssess what these matches say about the \
         image's provenance: does it appear in stock archives, news coverage, \
         AI-art galleries, or social reposts? Does the earliest plausible \
         source support or undermine authenticity? Answer in plain prose, \
         three sentences at most.",
        findings.total,
        format_matches(&findings.matches)
    )
}
