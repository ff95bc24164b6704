//! Final aggregation contract and the verdict it produces.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::AggregateError;
use crate::input::TaskInput;
use crate::step::StepResult;

/// Terminal artifact of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Probability, 0-100, that the image is AI-generated or manipulated.
    /// Absent when the aggregator could not commit to a number.
    pub probability_score: Option<f64>,

    /// Human-readable reasoning behind the score.
    pub explanation: String,
}

/// Everything the aggregator sees: the original input plus the ordered
/// mapping of step name to step result (insertion order = execution order).
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub input: TaskInput,
    pub results: IndexMap<String, StepResult>,
}

impl AnalysisContext {
    pub fn new(input: TaskInput) -> Self {
        Self {
            input,
            results: IndexMap::new(),
        }
    }

    /// Record one step's result, keyed by its step name.
    pub fn push(&mut self, result: StepResult) {
        self.results.insert(result.step_name.clone(), result);
    }
}

/// Consumes all step results and produces the final verdict.
///
/// Invoked exactly once per run, after every scheduled step has reached a
/// terminal state. Failure here is the only fatal path of a run.
#[async_trait]
pub trait Aggregator: Send + Sync {
    async fn aggregate(
        &self,
        context: &AnalysisContext,
    ) -> std::result::Result<Verdict, AggregateError>;
}
