//! Visual forensics step: one model pass over the pixels looking for
//! generation artifacts, returning a structured artifact report.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use forgesight_core::{AnalysisStep, StepResult, TaskInput};

use crate::extract;
use crate::provider::{ImagePayload, ModelRequest, VisionModel};

pub const NAME: &str = "visual_forensics";
pub const DISPLAY_NAME: &str = "Visual Forensics";

const SYSTEM_PROMPT: &str = "\
You are a forensic image analyst specializing in detecting AI-generated and manipulated images.
Inspect the image for the classic generation artifacts:
- anatomy: malformed hands, teeth, ears, asymmetric eyes or pupils
- texture: waxy skin, repeating tiles, smeared or melted fine detail
- lighting: inconsistent shadows, impossible highlights, mismatched color temperature
- text: garbled lettering, pseudo-characters, warped signage
- geometry: broken reflections, warped backgrounds, perspective errors
- semantics: impossible object relationships, nonsensical scene composition
Be precise about where in the frame each finding sits.";

const USER_PROMPT: &str = "\
Analyze the attached image and respond with ONLY a JSON object in this exact shape:
{
  \"fake_probability\": <number between 0.0 and 1.0>,
  \"confidence\": \"low\" | \"medium\" | \"high\",
  \"reasoning_summary\": \"<two or three sentences>\",
  \"flagged_artifacts\": [
    {\"indicator_type\": \"<anatomy|texture|lighting|text|geometry|semantics>\",
     \"location\": \"<where in the frame>\",
     \"description\": \"<what was observed>\",
     \"severity\": \"<low|medium|high>\"}
  ]
}
No prose outside the JSON.";

/// Artifact report the model is asked to produce.
#[derive(Debug, Serialize, Deserialize)]
struct ForensicsReport {
    fake_probability: f64,
    reasoning_summary: String,
    #[serde(default)]
    confidence: String,
    #[serde(default)]
    flagged_artifacts: Vec<ArtifactFlag>,
}

/// A single localized finding.
#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(default)]
struct ArtifactFlag {
    indicator_type: String,
    location: String,
    description: String,
    severity: String,
}

pub struct ForensicsStep {
    model: Arc<dyn VisionModel>,
}

impl ForensicsStep {
    pub fn new(model: Arc<dyn VisionModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl AnalysisStep for ForensicsStep {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        DISPLAY_NAME
    }

    async fn run(&self, input: &TaskInput) -> StepResult {
        let request = ModelRequest::text(USER_PROMPT)
            .with_system(SYSTEM_PROMPT)
            .with_image(ImagePayload::from_bytes(input.image.clone()));

        let reply = match self.model.generate(request).await {
            Ok(reply) => reply,
            Err(e) => return StepResult::failure(NAME, e.to_string()),
        };

        match parse_report(&reply) {
            Ok(report) => match serde_json::to_value(&report) {
                Ok(mut content) => {
                    content["model_used"] = json!(self.model.model_name());
                    StepResult::success(NAME, content)
                }
                Err(e) => {
                    StepResult::failure(NAME, format!("report serialization failed: {e}"))
                }
            },
            Err(message) => StepResult::failure(NAME, message),
        }
    }
}

fn parse_report(reply: &str) -> Result<ForensicsReport, String> {
    let value = extract::parse_object(reply)
        .ok_or_else(|| "no JSON object in model reply".to_string())?;
    let mut report: ForensicsReport =
        serde_json::from_value(value).map_err(|e| format!("malformed forensics report: {e}"))?;
    report.fake_probability = report.fake_probability.clamp(0.0, 1.0);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{ScriptedModel, ScriptedReply};

    fn sample_input() -> TaskInput {
        TaskInput::new(vec![0x89, b'P', b'N', b'G'], None)
    }

    #[tokio::test]
    async fn well_formed_reply_round_trips() {
        let reply = r#"{
            "fake_probability": 0.85,
            "confidence": "high",
            "reasoning_summary": "Hands show six fingers and the signage is garbled.",
            "flagged_artifacts": [
                {"indicator_type": "anatomy", "location": "lower left",
                 "description": "six fingers on the visible hand", "severity": "high"}
            ]
        }"#;
        let step = ForensicsStep::new(Arc::new(ScriptedModel::single(reply)));
        let result = step.run(&sample_input()).await;

        assert!(result.is_success());
        assert_eq!(result.content["fake_probability"], 0.85);
        assert_eq!(result.content["flagged_artifacts"][0]["indicator_type"], "anatomy");
        assert_eq!(result.content["model_used"], "scripted-model");
    }

    #[tokio::test]
    async fn fenced_reply_is_tolerated() {
        let reply = "```json\n{\"fake_probability\": 0.1, \"reasoning_summary\": \"clean\"}\n```";
        let step = ForensicsStep::new(Arc::new(ScriptedModel::single(reply)));
        let result = step.run(&sample_input()).await;

        assert!(result.is_success());
        assert_eq!(result.content["fake_probability"], 0.1);
        // Defaults fill the fields the model omitted.
        assert_eq!(result.content["confidence"], "");
        assert_eq!(result.content["flagged_artifacts"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn prose_reply_is_a_step_failure() {
        let step = ForensicsStep::new(Arc::new(ScriptedModel::single(
            "It certainly looks synthetic to me.",
        )));
        let result = step.run(&sample_input()).await;
        assert!(!result.is_success());
        assert_eq!(result.error.as_deref(), Some("no JSON object in model reply"));
    }

    #[tokio::test]
    async fn wrong_field_types_are_reported_as_malformed() {
        let step = ForensicsStep::new(Arc::new(ScriptedModel::single(
            r#"{"fake_probability": "very", "reasoning_summary": "hmm"}"#,
        )));
        let result = step.run(&sample_input()).await;
        assert!(!result.is_success());
        assert!(result
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("malformed forensics report")));
    }

    #[tokio::test]
    async fn out_of_range_probability_is_clamped() {
        let step = ForensicsStep::new(Arc::new(ScriptedModel::single(
            r#"{"fake_probability": 3.2, "reasoning_summary": "overshoot"}"#,
        )));
        let result = step.run(&sample_input()).await;
        assert!(result.is_success());
        assert_eq!(result.content["fake_probability"], 1.0);
    }

    #[tokio::test]
    async fn provider_error_becomes_step_failure() {
        let step = ForensicsStep::new(Arc::new(ScriptedModel::new(vec![ScriptedReply::fail(
            "model overloaded",
        )])));
        let result = step.run(&sample_input()).await;
        assert!(!result.is_success());
        assert!(result
            .error
            .as_deref()
            .is_some_and(|e| e.contains("status 500")));
    }
}
