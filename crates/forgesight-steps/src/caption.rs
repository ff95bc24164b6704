//! Caption cross-check step.
//!
//! Only runs a model pass when the task actually carried text; a missing
//! caption is a successful no-op, not an error.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use forgesight_core::{AnalysisStep, StepResult, TaskInput};

use crate::provider::{ImagePayload, ModelRequest, VisionModel};

pub const NAME: &str = "caption_analysis";
pub const DISPLAY_NAME: &str = "Caption Analysis";

const PROMPT_PREAMBLE: &str = "\
An image arrived with the caption below. Judge whether the caption honestly
describes the attached image, whether it makes misleading claims about what
is depicted, and whether the pairing suggests a fabricated or out-of-context
post. Answer in plain prose, three sentences at most.";

pub struct CaptionStep {
    model: Arc<dyn VisionModel>,
}

impl CaptionStep {
    pub fn new(model: Arc<dyn VisionModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl AnalysisStep for CaptionStep {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        DISPLAY_NAME
    }

    async fn run(&self, input: &TaskInput) -> StepResult {
        if !input.has_text() {
            return StepResult::success(
                NAME,
                json!({
                    "text_present": false,
                    "note": "no caption supplied; nothing to cross-check",
                }),
            );
        }
        let caption = input.text.as_deref().unwrap_or_default().trim();

        let prompt = format!("{PROMPT_PREAMBLE}\n\nCaption: {caption}");
        let request = ModelRequest::text(prompt)
            .with_image(ImagePayload::from_bytes(input.image.clone()));

        match self.model.generate(request).await {
            Ok(assessment) => StepResult::success(
                NAME,
                json!({
                    "text_present": true,
                    "caption": caption,
                    "assessment": assessment.trim(),
                    "model_used": self.model.model_name(),
                }),
            ),
            Err(e) => StepResult::failure(NAME, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{ScriptedModel, ScriptedReply};

    #[tokio::test]
    async fn missing_caption_short_circuits_without_a_model_call() {
        let model = Arc::new(ScriptedModel::single("should never be consumed"));
        let step = CaptionStep::new(model.clone());

        let result = step.run(&TaskInput::new(vec![1, 2, 3], None)).await;

        assert!(result.is_success());
        assert_eq!(result.content["text_present"], false);
        assert_eq!(model.remaining(), 1);
    }

    #[tokio::test]
    async fn whitespace_caption_counts_as_missing() {
        let model = Arc::new(ScriptedModel::single("unused"));
        let step = CaptionStep::new(model.clone());

        let input = TaskInput::new(vec![1], Some("   \n\t".to_string()));
        let result = step.run(&input).await;

        assert_eq!(result.content["text_present"], false);
        assert_eq!(model.remaining(), 1);
    }

    #[tokio::test]
    async fn caption_is_cross_checked_against_the_image() {
        let model = Arc::new(ScriptedModel::single(
            "  The caption claims Paris but the skyline is unmistakably New York.  ",
        ));
        let step = CaptionStep::new(model);

        let input = TaskInput::new(vec![1], Some("Taken in Paris yesterday".to_string()));
        let result = step.run(&input).await;

        assert!(result.is_success());
        assert_eq!(result.content["text_present"], true);
        assert_eq!(result.content["caption"], "Taken in Paris yesterday");
        assert_eq!(
            result.content["assessment"],
            "The caption claims Paris but the skyline is unmistakably New York."
        );
        assert_eq!(result.content["model_used"], "scripted-model");
    }

    #[tokio::test]
    async fn provider_failure_is_a_step_failure() {
        let step = CaptionStep::new(Arc::new(ScriptedModel::new(vec![ScriptedReply::fail(
            "quota exceeded",
        )])));
        let input = TaskInput::new(vec![1], Some("a real photo".to_string()));
        let result = step.run(&input).await;

        assert!(!result.is_success());
        assert!(result
            .error
            .as_deref()
            .is_some_and(|e| e.contains("status 500")));
    }
}
