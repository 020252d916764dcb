//! The annotation pipeline: DataPrep -> Lookup -> FeaturesInitial ->
//! PredictInitial -> FeaturesRevision -> PredictFinal -> Decision (spec §4).

pub mod data_prep;
pub mod decision;
pub mod error;
pub mod features_initial;
pub mod features_revision;
pub mod lookup;
pub mod normalize;
pub mod orchestrator;
pub mod prediction;

pub use error::PipelineError;
pub use orchestrator::{process_page, PipelineOutcome};
