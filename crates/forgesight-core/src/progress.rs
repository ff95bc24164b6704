//! Typed progress events and the push-channel contract.
//!
//! One event stream exists per run. Events are append-only, totally ordered,
//! and consumed by at most one listener. Delivery is at-most-once: an absent
//! or disconnected listener never blocks the pipeline.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::step::StepResult;

/// Step findings as carried inside a `step_complete` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// Structured step findings.
    pub content: serde_json::Value,
}

impl From<&StepResult> for StepReport {
    fn from(result: &StepResult) -> Self {
        Self {
            content: result.content.clone(),
        }
    }
}

/// Progress events pushed to the listener, in emission order.
///
/// Wire form is `{"type": <tag>, "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A run has begun; `total_steps` steps will be attempted.
    Start { total_steps: usize },

    /// A step is about to execute.
    StepStart { step: String, display_name: String },

    /// A step finished with usable findings.
    StepComplete { step: String, result: StepReport },

    /// A step failed; the run continues.
    StepError { step: String, error: String },

    /// Every step has reached a terminal event; aggregation begins.
    FinalAnalysisStart {},

    /// The aggregated verdict.
    FinalResult {
        probability_score: Option<f64>,
        explanation: String,
    },

    /// The run finished; the stream closes after this event.
    Complete {},

    /// The run aborted; the stream closes after this event.
    Error { error: String },
}

impl ProgressEvent {
    /// Wire tag of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::StepStart { .. } => "step_start",
            Self::StepComplete { .. } => "step_complete",
            Self::StepError { .. } => "step_error",
            Self::FinalAnalysisStart {} => "final_analysis_start",
            Self::FinalResult { .. } => "final_result",
            Self::Complete {} => "complete",
            Self::Error { .. } => "error",
        }
    }
}

/// Push side of the progress channel.
///
/// `emit` must never block and must never fail the caller.
pub trait ProgressEmitter: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Emitter that discards every event, for headless runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEmitter;

impl ProgressEmitter for NullEmitter {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Receiving side of a per-run progress channel.
pub type ProgressStream = mpsc::UnboundedReceiver<ProgressEvent>;

/// Emitter backed by an unbounded in-process channel.
#[derive(Debug, Clone)]
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelEmitter {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressEmitter for ChannelEmitter {
    fn emit(&self, event: ProgressEvent) {
        // A closed receiver means the listener went away; the run continues.
        let _ = self.tx.send(event);
    }
}

/// Build a connected emitter/stream pair for one run.
pub fn progress_channel() -> (ChannelEmitter, ProgressStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelEmitter::new(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn start_event_wire_shape() {
        let event = ProgressEvent::Start { total_steps: 3 };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "start", "data": {"total_steps": 3}})
        );
    }

    #[test]
    fn step_start_event_wire_shape() {
        let event = ProgressEvent::StepStart {
            step: "visual_forensics".to_string(),
            display_name: "Visual Forensics".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "step_start",
                "data": {"step": "visual_forensics", "display_name": "Visual Forensics"}
            })
        );
    }

    #[test]
    fn step_complete_event_wire_shape() {
        let result = StepResult::success("metadata_analysis", json!({"format": "png"}));
        let event = ProgressEvent::StepComplete {
            step: result.step_name.clone(),
            result: StepReport::from(&result),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "step_complete",
                "data": {
                    "step": "metadata_analysis",
                    "result": {"content": {"format": "png"}}
                }
            })
        );
    }

    #[test]
    fn step_error_event_wire_shape() {
        let event = ProgressEvent::StepError {
            step: "reverse_image_search".to_string(),
            error: "timeout".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "step_error",
                "data": {"step": "reverse_image_search", "error": "timeout"}
            })
        );
    }

    #[test]
    fn final_analysis_start_event_wire_shape() {
        assert_eq!(
            serde_json::to_value(ProgressEvent::FinalAnalysisStart {}).unwrap(),
            json!({"type": "final_analysis_start", "data": {}})
        );
    }

    #[test]
    fn final_result_event_wire_shape() {
        let event = ProgressEvent::FinalResult {
            probability_score: Some(82.0),
            explanation: "strong generator signatures".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "final_result",
                "data": {
                    "probability_score": 82.0,
                    "explanation": "strong generator signatures"
                }
            })
        );
    }

    #[test]
    fn final_result_serializes_absent_score_as_null() {
        let event = ProgressEvent::FinalResult {
            probability_score: None,
            explanation: "inconclusive".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "final_result",
                "data": {"probability_score": null, "explanation": "inconclusive"}
            })
        );
    }

    #[test]
    fn complete_event_wire_shape() {
        assert_eq!(
            serde_json::to_value(ProgressEvent::Complete {}).unwrap(),
            json!({"type": "complete", "data": {}})
        );
    }

    #[test]
    fn error_event_wire_shape() {
        let event = ProgressEvent::Error {
            error: "aggregation failed: provider error: status 503".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "error",
                "data": {"error": "aggregation failed: provider error: status 503"}
            })
        );
    }

    #[test]
    fn kind_matches_serialized_type_tag() {
        let events = vec![
            ProgressEvent::Start { total_steps: 0 },
            ProgressEvent::StepStart {
                step: "s".to_string(),
                display_name: "S".to_string(),
            },
            ProgressEvent::StepComplete {
                step: "s".to_string(),
                result: StepReport {
                    content: json!(null),
                },
            },
            ProgressEvent::StepError {
                step: "s".to_string(),
                error: "e".to_string(),
            },
            ProgressEvent::FinalAnalysisStart {},
            ProgressEvent::FinalResult {
                probability_score: None,
                explanation: "e".to_string(),
            },
            ProgressEvent::Complete {},
            ProgressEvent::Error {
                error: "e".to_string(),
            },
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.kind());
        }
    }

    #[test]
    fn events_deserialize_from_wire_form() {
        let event: ProgressEvent = serde_json::from_value(json!({
            "type": "step_complete",
            "data": {"step": "judge_debate", "result": {"content": {"final_verdict": "Fake"}}}
        }))
        .unwrap();
        assert_eq!(
            event,
            ProgressEvent::StepComplete {
                step: "judge_debate".to_string(),
                result: StepReport {
                    content: json!({"final_verdict": "Fake"}),
                },
            }
        );
    }

    #[test]
    fn channel_emitter_is_safe_after_listener_disconnects() {
        let (emitter, stream) = progress_channel();
        drop(stream);
        // Must neither panic nor block.
        emitter.emit(ProgressEvent::Complete {});
    }

    #[tokio::test]
    async fn channel_delivers_events_in_emission_order() {
        let (emitter, mut stream) = progress_channel();
        emitter.emit(ProgressEvent::Start { total_steps: 1 });
        emitter.emit(ProgressEvent::FinalAnalysisStart {});
        emitter.emit(ProgressEvent::Complete {});
        drop(emitter);

        let mut kinds = Vec::new();
        while let Some(event) = stream.recv().await {
            kinds.push(event.kind());
        }
        assert_eq!(kinds, vec!["start", "final_analysis_start", "complete"]);
    }
}
