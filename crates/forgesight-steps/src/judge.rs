//! Consensus judge: the aggregator that reads every detector's findings
//! and produces the run's verdict.
//!
//! The judge sees text only. Detector outputs are already structured, and
//! withholding the pixels keeps it from overriding the evidence with its
//! own first impression.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use forgesight_core::{AggregateError, AnalysisContext, Aggregator, Verdict};

use crate::extract;
use crate::provider::{ModelRequest, VisionModel};

const SYSTEM_PROMPT: &str = "\
You are the final arbiter in an image authenticity investigation. Several
independent detectors have reported their findings. Weigh them against each
other, prefer hard evidence (embedded generator metadata, provenance matches)
over single-model intuition, and produce one verdict.";

const VERDICT_FOOTER: &str = "\
Respond with ONLY a JSON object:
{\"probability_score\": <integer 0-100, probability the image is AI-generated or manipulated>,
 \"explanation\": \"<verdict for the user, citing the decisive findings>\"}
If the findings cannot support a score, set \"probability_score\" to null and explain why.";

pub struct ConsensusJudge {
    model: Arc<dyn VisionModel>,
}

impl ConsensusJudge {
    pub fn new(model: Arc<dyn VisionModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Aggregator for ConsensusJudge {
    async fn aggregate(&self, context: &AnalysisContext) -> Result<Verdict, AggregateError> {
        let prompt = build_judge_prompt(context);
        let reply = self
            .model
            .generate(ModelRequest::text(prompt).with_system(SYSTEM_PROMPT))
            .await
            .map_err(|e| AggregateError::Provider(e.to_string()))?;
        Ok(parse_verdict(&reply))
    }
}

/// Render every step's outcome, success or failure, in execution order.
fn build_judge_prompt(context: &AnalysisContext) -> String {
    let mut prompt = String::from("Detector findings:\n\n");
    for (name, result) in &context.results {
        let heading = if result.is_success() {
            "succeeded"
        } else {
            "failed"
        };
        prompt.push_str(&format!("### {name} ({heading})\n"));
        if result.is_success() {
            let body = serde_json::to_string_pretty(&result.content)
                .unwrap_or_else(|_| result.content.to_string());
            prompt.push_str(&body);
        } else {
            prompt.push_str(&format!(
                "error: {}",
                result.error.as_deref().unwrap_or("unspecified error")
            ));
        }
        prompt.push_str("\n\n");
    }
    if context.input.has_text() {
        let text = context.input.text.as_deref().unwrap_or_default().trim();
        prompt.push_str(&format!(
            "The image was accompanied by this text: {text}\n\n"
        ));
    }
    prompt.push_str(VERDICT_FOOTER);
    prompt
}

/// Recover a verdict from whatever the judge replied.
///
/// Ladder: structured parse, then a narrow regex for an embedded
/// `probability_score` object, then the raw reply as an unscored
/// explanation. A reply never fails aggregation once the provider
/// returned one.
fn parse_verdict(reply: &str) -> Verdict {
    if let Some(value) = extract::parse_object(reply) {
        return verdict_from_value(value, reply);
    }
    if let Some(value) = regex_fallback(reply) {
        return verdict_from_value(value, reply);
    }
    Verdict {
        probability_score: None,
        explanation: reply.trim().to_string(),
    }
}

fn regex_fallback(reply: &str) -> Option<Value> {
    let pattern = Regex::new(r#"\{[^{}]*"probability_score"[^{}]*\}"#).ok()?;
    let matched = pattern.find(reply)?;
    serde_json::from_str(matched.as_str()).ok()
}

fn verdict_from_value(value: Value, raw: &str) -> Verdict {
    let probability_score = value
        .get("probability_score")
        .and_then(Value::as_f64)
        .map(|score| score.clamp(0.0, 100.0));
    let explanation = value
        .get("explanation")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| raw.trim().to_string());
    Verdict {
        probability_score,
        explanation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{ScriptedModel, ScriptedReply};
    use forgesight_core::{StepResult, TaskInput};
    use serde_json::json;

    fn context_with_results() -> AnalysisContext {
        let input = TaskInput::new(vec![1, 2, 3], Some("look at this!".to_string()));
        let mut context = AnalysisContext::new(input);
        context.push(StepResult::success(
            "reverse_image_search",
            json!({"num_results": 0}),
        ));
        context.push(StepResult::failure("visual_forensics", "timeout"));
        context
    }

    #[tokio::test]
    async fn clean_json_reply_parses() {
        let judge = ConsensusJudge::new(Arc::new(ScriptedModel::single(
            r#"{"probability_score": 85, "explanation": "metadata carries a generator signature"}"#,
        )));
        let verdict = judge.aggregate(&context_with_results()).await.unwrap();

        assert_eq!(verdict.probability_score, Some(85.0));
        assert_eq!(verdict.explanation, "metadata carries a generator signature");
    }

    #[tokio::test]
    async fn fenced_reply_parses() {
        let judge = ConsensusJudge::new(Arc::new(ScriptedModel::single(
            "```json\n{\"probability_score\": 10, \"explanation\": \"clean provenance\"}\n```",
        )));
        let verdict = judge.aggregate(&context_with_results()).await.unwrap();
        assert_eq!(verdict.probability_score, Some(10.0));
    }

    #[tokio::test]
    async fn embedded_object_is_recovered_by_the_regex() {
        let reply = "Hmm {let me think} ... my answer is \
                     {\"probability_score\": 40, \"explanation\": \"mixed signals\"} overall.";
        let judge = ConsensusJudge::new(Arc::new(ScriptedModel::single(reply)));
        let verdict = judge.aggregate(&context_with_results()).await.unwrap();

        assert_eq!(verdict.probability_score, Some(40.0));
        assert_eq!(verdict.explanation, "mixed signals");
    }

    #[tokio::test]
    async fn prose_reply_becomes_an_unscored_verdict() {
        let judge = ConsensusJudge::new(Arc::new(ScriptedModel::single(
            "  The detectors disagree too strongly to score this.  ",
        )));
        let verdict = judge.aggregate(&context_with_results()).await.unwrap();

        assert_eq!(verdict.probability_score, None);
        assert_eq!(
            verdict.explanation,
            "The detectors disagree too strongly to score this."
        );
    }

    #[tokio::test]
    async fn null_score_passes_through() {
        let judge = ConsensusJudge::new(Arc::new(ScriptedModel::single(
            r#"{"probability_score": null, "explanation": "conflicting evidence"}"#,
        )));
        let verdict = judge.aggregate(&context_with_results()).await.unwrap();

        assert_eq!(verdict.probability_score, None);
        assert_eq!(verdict.explanation, "conflicting evidence");
    }

    #[tokio::test]
    async fn out_of_range_scores_are_clamped() {
        let judge = ConsensusJudge::new(Arc::new(ScriptedModel::single(
            r#"{"probability_score": 250, "explanation": "overshoot"}"#,
        )));
        let verdict = judge.aggregate(&context_with_results()).await.unwrap();
        assert_eq!(verdict.probability_score, Some(100.0));
    }

    #[tokio::test]
    async fn missing_explanation_falls_back_to_the_raw_reply() {
        let judge = ConsensusJudge::new(Arc::new(ScriptedModel::single(
            r#"{"probability_score": 70}"#,
        )));
        let verdict = judge.aggregate(&context_with_results()).await.unwrap();

        assert_eq!(verdict.probability_score, Some(70.0));
        assert_eq!(verdict.explanation, r#"{"probability_score": 70}"#);
    }

    #[tokio::test]
    async fn provider_failure_is_fatal_to_aggregation() {
        let judge = ConsensusJudge::new(Arc::new(ScriptedModel::new(vec![
            ScriptedReply::fail("billing disabled"),
        ])));
        let error = judge.aggregate(&context_with_results()).await.unwrap_err();

        match error {
            AggregateError::Provider(message) => assert!(message.contains("status 500")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn prompt_lists_every_step_in_execution_order() {
        let prompt = build_judge_prompt(&context_with_results());

        let search_at = prompt.find("### reverse_image_search (succeeded)");
        let forensics_at = prompt.find("### visual_forensics (failed)");
        assert!(search_at.is_some());
        assert!(forensics_at.is_some());
        assert!(search_at < forensics_at);
        assert!(prompt.contains("error: timeout"));
        assert!(prompt.contains("look at this!"));
        assert!(prompt.contains("probability_score"));
    }
}
