//! Pipeline execution: drives the registered steps over one input, streams
//! progress, and produces the terminal verdict.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use indexmap::IndexMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregate::{AnalysisContext, Aggregator, Verdict};
use crate::error::{PipelineError, Result};
use crate::input::TaskInput;
use crate::progress::{ProgressEmitter, ProgressEvent, StepReport};
use crate::registry::StepRegistry;
use crate::step::{AnalysisStep, StepResult, StepStatus};
use crate::telemetry::RunSpan;

/// Execution knobs for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Backstop for a step that never returns. On expiry the runner
    /// synthesizes an error result for the step and moves on; steps are
    /// expected to self-timeout well below this bound.
    pub step_timeout: Duration,

    /// Maximum number of steps in flight at once. `0` and `1` both run
    /// steps strictly sequentially, which keeps the progress narrative
    /// deterministic.
    pub max_concurrent: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(45),
            max_concurrent: 1,
        }
    }
}

/// Result of a complete pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Unique id of this run.
    pub run_id: String,

    /// The aggregated verdict.
    pub verdict: Verdict,

    /// Step results keyed by step name, in registration order.
    pub results: IndexMap<String, StepResult>,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl PipelineOutcome {
    /// Number of steps that produced usable findings.
    pub fn succeeded_count(&self) -> usize {
        self.results.values().filter(|r| r.is_success()).count()
    }

    /// Number of steps that failed.
    pub fn failed_count(&self) -> usize {
        self.results.values().filter(|r| !r.is_success()).count()
    }
}

/// Pipeline orchestrator.
///
/// One runner can serve many runs; each `execute` call is fully isolated.
pub struct PipelineRunner {
    config: PipelineConfig,
}

impl PipelineRunner {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run every registered step against `input`, then aggregate.
    ///
    /// Event order per run: `start`, then for each step `step_start`
    /// followed by `step_complete` or `step_error`, then
    /// `final_analysis_start`, then either `final_result` + `complete` or a
    /// terminal `error`.
    ///
    /// Individual step failures (including backstop timeouts) are folded
    /// into their results and never abort the run. Aggregation failure is
    /// the only fatal path.
    pub async fn execute(
        &self,
        input: TaskInput,
        registry: &StepRegistry,
        emitter: &dyn ProgressEmitter,
        aggregator: &dyn Aggregator,
    ) -> Result<PipelineOutcome> {
        let run_id = Uuid::new_v4().to_string();
        let _span = RunSpan::enter(&run_id);
        let started_at = Utc::now();
        let start = Instant::now();
        let digest = input.image_digest();

        info!(
            steps = registry.len(),
            image_bytes = input.image.len(),
            image_digest = %&digest[..12],
            has_text = input.has_text(),
            "starting analysis run"
        );

        emitter.emit(ProgressEvent::Start {
            total_steps: registry.len(),
        });

        let results = if self.config.max_concurrent > 1 {
            self.run_steps_parallel(&input, registry, emitter).await
        } else {
            self.run_steps_sequential(&input, registry, emitter).await
        };

        emitter.emit(ProgressEvent::FinalAnalysisStart {});

        let mut context = AnalysisContext::new(input);
        for result in results {
            context.push(result);
        }

        match aggregator.aggregate(&context).await {
            Ok(verdict) => {
                emitter.emit(ProgressEvent::FinalResult {
                    probability_score: verdict.probability_score,
                    explanation: verdict.explanation.clone(),
                });
                emitter.emit(ProgressEvent::Complete {});

                let outcome = PipelineOutcome {
                    run_id,
                    verdict,
                    results: context.results,
                    started_at,
                    duration_ms: start.elapsed().as_millis() as u64,
                };
                info!(
                    duration_ms = outcome.duration_ms,
                    succeeded = outcome.succeeded_count(),
                    failed = outcome.failed_count(),
                    "analysis run complete"
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!(error = %e, "aggregation failed; run aborted");
                emitter.emit(ProgressEvent::Error {
                    error: e.to_string(),
                });
                Err(PipelineError::Aggregation(e))
            }
        }
    }

    async fn run_steps_sequential(
        &self,
        input: &TaskInput,
        registry: &StepRegistry,
        emitter: &dyn ProgressEmitter,
    ) -> Vec<StepResult> {
        let mut results = Vec::with_capacity(registry.len());
        for step in registry.steps() {
            results.push(self.run_step(step.as_ref(), input, emitter).await);
        }
        results
    }

    async fn run_steps_parallel(
        &self,
        input: &TaskInput,
        registry: &StepRegistry,
        emitter: &dyn ProgressEmitter,
    ) -> Vec<StepResult> {
        let mut indexed: Vec<(usize, StepResult)> =
            futures::stream::iter(registry.steps().iter().enumerate().map(
                |(idx, step)| async move {
                    (idx, self.run_step(step.as_ref(), input, emitter).await)
                },
            ))
            .buffer_unordered(self.config.max_concurrent)
            .collect()
            .await;

        // Listeners may observe interleaved step events, but the collected
        // mapping always follows registration order.
        indexed.sort_by_key(|(idx, _)| *idx);
        indexed.into_iter().map(|(_, result)| result).collect()
    }

    async fn run_step(
        &self,
        step: &dyn AnalysisStep,
        input: &TaskInput,
        emitter: &dyn ProgressEmitter,
    ) -> StepResult {
        emitter.emit(ProgressEvent::StepStart {
            step: step.name().to_string(),
            display_name: step.display_name().to_string(),
        });

        let started = Instant::now();
        let mut result =
            match tokio::time::timeout(self.config.step_timeout, step.run(input)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        step = step.name(),
                        timeout_secs = self.config.step_timeout.as_secs(),
                        "step exceeded the runner backstop"
                    );
                    StepResult::failure(step.name(), "timeout")
                }
            };
        // Events and the result mapping are keyed by the registered name,
        // not by whatever name the result happens to carry.
        result.step_name = step.name().to_string();

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result.status {
            StepStatus::Success => {
                emitter.emit(ProgressEvent::StepComplete {
                    step: result.step_name.clone(),
                    result: StepReport::from(&result),
                });
                info!(step = step.name(), elapsed_ms, "step complete");
            }
            StepStatus::Error => {
                let message = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "unspecified error".to_string());
                emitter.emit(ProgressEvent::StepError {
                    step: result.step_name.clone(),
                    error: message.clone(),
                });
                warn!(step = step.name(), elapsed_ms, error = %message, "step failed");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_config_is_sequential_with_backstop() {
        let config = PipelineConfig::default();
        assert_eq!(config.step_timeout, Duration::from_secs(45));
        assert_eq!(config.max_concurrent, 1);
    }

    #[test]
    fn outcome_counts_split_by_status() {
        let mut results = IndexMap::new();
        results.insert(
            "metadata_analysis".to_string(),
            StepResult::success("metadata_analysis", json!({"format": "png"})),
        );
        results.insert(
            "visual_forensics".to_string(),
            StepResult::failure("visual_forensics", "timeout"),
        );
        results.insert(
            "judge_debate".to_string(),
            StepResult::success("judge_debate", json!({"final_verdict": "Real"})),
        );

        let outcome = PipelineOutcome {
            run_id: "run-1".to_string(),
            verdict: Verdict {
                probability_score: Some(12.0),
                explanation: "consistent capture metadata".to_string(),
            },
            results,
            started_at: Utc::now(),
            duration_ms: 1234,
        };

        assert_eq!(outcome.succeeded_count(), 2);
        assert_eq!(outcome.failed_count(), 1);
    }
}
