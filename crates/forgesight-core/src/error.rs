//! Error taxonomy for the pipeline engine.
//!
//! Step-level failures never appear here: a failing step is folded into its
//! own `StepResult` and the run continues. Only registration conflicts and
//! final-aggregation failures surface as errors.

use thiserror::Error;

/// Errors surfaced by pipeline construction and execution.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("duplicate step registered: {0}")]
    DuplicateStep(String),

    #[error("aggregation failed: {0}")]
    Aggregation(#[from] AggregateError),
}

/// Failure modes of the final aggregation stage.
///
/// The only fatal path of a run: the runner converts this into a terminal
/// `error` progress event and ends the run without a verdict.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregateError {
    /// The aggregator's model provider could not be reached or refused
    /// the request.
    #[error("provider error: {0}")]
    Provider(String),

    /// A verdict could not be assembled from the available inputs.
    #[error("verdict construction failed: {0}")]
    Verdict(String),
}

/// Convenience alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
