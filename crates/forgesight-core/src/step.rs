//! Analysis step contract and per-step results.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::input::TaskInput;

/// Terminal status of one step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Error,
}

/// Immutable output of one analysis step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Stable step name; keys progress events and the run's result mapping.
    pub step_name: String,

    /// Terminal status.
    pub status: StepStatus,

    /// Structured findings; `Value::Null` when the step failed.
    pub content: Value,

    /// Failure message when `status` is `Error`.
    pub error: Option<String>,
}

impl StepResult {
    /// Successful result carrying structured findings.
    pub fn success(step_name: impl Into<String>, content: Value) -> Self {
        Self {
            step_name: step_name.into(),
            status: StepStatus::Success,
            content,
            error: None,
        }
    }

    /// Failed result carrying a human-readable message.
    pub fn failure(step_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            status: StepStatus::Error,
            content: Value::Null,
            error: Some(message.into()),
        }
    }

    /// Whether the step produced usable findings.
    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}

/// One self-contained analysis of a [`TaskInput`].
///
/// Implementations are stateless and shareable across runs. A step never
/// errors past its own boundary: internal failures (provider errors,
/// malformed model replies, bad input bytes) are folded into
/// [`StepResult::failure`]. The runner additionally bounds each call with a
/// timeout as a backstop against hangs.
#[async_trait]
pub trait AnalysisStep: Send + Sync {
    /// Stable identifier used in progress events and the result mapping.
    fn name(&self) -> &'static str;

    /// Human-readable name shown to listeners.
    fn display_name(&self) -> &'static str;

    /// Run the analysis. May ignore `input.text`; must not mutate the input.
    async fn run(&self, input: &TaskInput) -> StepResult;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(StepStatus::Success).unwrap(),
            json!("success")
        );
        assert_eq!(
            serde_json::to_value(StepStatus::Error).unwrap(),
            json!("error")
        );
    }

    #[test]
    fn success_result_has_no_error() {
        let result = StepResult::success("metadata_analysis", json!({"format": "png"}));
        assert!(result.is_success());
        assert_eq!(result.error, None);
        assert_eq!(result.content["format"], "png");
    }

    #[test]
    fn failure_result_carries_message_and_null_content() {
        let result = StepResult::failure("visual_forensics", "timeout");
        assert!(!result.is_success());
        assert_eq!(result.status, StepStatus::Error);
        assert_eq!(result.content, Value::Null);
        assert_eq!(result.error.as_deref(), Some("timeout"));
    }
}
