//! Annotation cost prediction.

pub mod model;
pub mod registry;

pub use model::{AdaptiveCostModel, CostParams, CostUpdateSummary, Interaction};
pub use registry::{normalize_annotator_id, CostModelRegistry, RegistryUpdate, DEFAULT_ANNOTATOR};
