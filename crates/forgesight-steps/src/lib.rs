//! Detector steps and the consensus aggregator for the forgesight
//! pipeline.
//!
//! Five detectors ship by default: reverse image search, visual
//! forensics, an adversarial judge debate, container metadata
//! inspection, and caption cross-checking. [`default_registry`] wires
//! them in their canonical order; [`ConsensusJudge`] turns their
//! combined findings into the final verdict.

use std::sync::Arc;

use forgesight_core::StepRegistry;

pub mod caption;
pub mod debate;
mod extract;
pub mod fakes;
pub mod forensics;
pub mod judge;
pub mod metadata;
pub mod provider;
pub mod search;

pub use caption::CaptionStep;
pub use debate::DebateStep;
pub use forensics::ForensicsStep;
pub use judge::ConsensusJudge;
pub use metadata::MetadataStep;
pub use provider::{
    GeminiClient, ImagePayload, ModelRequest, ProviderConfig, ProviderError, VisionModel,
    DEFAULT_MODEL,
};
pub use search::{SearchConfig, SearchStep};

/// Build the standard registry. Registration order is execution order
/// and therefore the order progress events narrate.
pub fn default_registry(
    model: Arc<dyn VisionModel>,
    search: SearchConfig,
) -> forgesight_core::Result<StepRegistry> {
    let mut registry = StepRegistry::default();
    registry.register(Arc::new(SearchStep::new(search, model.clone())))?;
    registry.register(Arc::new(ForensicsStep::new(model.clone())))?;
    registry.register(Arc::new(DebateStep::new(model.clone())))?;
    registry.register(Arc::new(MetadataStep::new()))?;
    registry.register(Arc::new(CaptionStep::new(model)))?;
    Ok(registry)
}

/// `(name, display name)` pairs for every step [`default_registry`]
/// installs, in order. Usable without any credentials.
pub fn step_catalog() -> Vec<(&'static str, &'static str)> {
    vec![
        (search::NAME, search::DISPLAY_NAME),
        (forensics::NAME, forensics::DISPLAY_NAME),
        (debate::NAME, debate::DISPLAY_NAME),
        (metadata::NAME, metadata::DISPLAY_NAME),
        (caption::NAME, caption::DISPLAY_NAME),
    ]
}
