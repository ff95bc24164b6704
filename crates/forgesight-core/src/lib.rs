//! Forgesight core — pipeline execution and progress-streaming engine.
//!
//! Runs a registered set of analysis steps against a shared image-plus-text
//! input, tolerates individual step failures, streams typed progress events
//! to a single listener per run, and hands the collected results to a final
//! aggregation stage that produces the verdict.
//!
//! The crate knows nothing about concrete detectors or model providers;
//! those live behind the [`AnalysisStep`] and [`Aggregator`] traits.

pub mod aggregate;
pub mod error;
pub mod input;
pub mod progress;
pub mod registry;
pub mod runner;
pub mod session;
pub mod step;
pub mod telemetry;

// Re-export key types
pub use aggregate::{AnalysisContext, Aggregator, Verdict};
pub use error::{AggregateError, PipelineError, Result};
pub use input::TaskInput;
pub use progress::{
    progress_channel, ChannelEmitter, NullEmitter, ProgressEmitter, ProgressEvent, ProgressStream,
    StepReport,
};
pub use registry::StepRegistry;
pub use runner::{PipelineConfig, PipelineOutcome, PipelineRunner};
pub use session::SessionRegistry;
pub use step::{AnalysisStep, StepResult, StepStatus};
pub use telemetry::{init_tracing, RunSpan};

/// Crate version, for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
