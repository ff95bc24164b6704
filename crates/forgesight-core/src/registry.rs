//! Ordered registry of analysis steps.

use std::sync::Arc;

use crate::error::{PipelineError, Result};
use crate::step::AnalysisStep;

/// Ordered collection of the steps one pipeline will run.
///
/// Registration order defines execution order and the `total_steps` count
/// reported to listeners. Step names must be unique: they key both progress
/// events and the collected result mapping. Populated at process start; no
/// dynamic discovery.
#[derive(Default, Clone)]
pub struct StepRegistry {
    steps: Vec<Arc<dyn AnalysisStep>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step, rejecting a name that is already registered.
    pub fn register(&mut self, step: Arc<dyn AnalysisStep>) -> Result<()> {
        if self.steps.iter().any(|s| s.name() == step.name()) {
            return Err(PipelineError::DuplicateStep(step.name().to_string()));
        }
        self.steps.push(step);
        Ok(())
    }

    /// Steps in registration order.
    pub fn steps(&self) -> &[Arc<dyn AnalysisStep>] {
        &self.steps
    }

    /// Registered names in execution order.
    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("steps", &self.names())
            .finish()
    }
}
