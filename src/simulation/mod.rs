//! Synthetic annotators and offline comparison of ranking strategies.

pub mod agents;
pub mod evaluation;

pub use agents::{
    AnnotatorDecision, AnnotatorKind, FatiguedAnnotator, HonestAnnotator, SimulatedAnnotator,
    SpammerAnnotator,
};
pub use evaluation::{
    cohens_d, mann_whitney_u, run_simulation, run_strategy, synthetic_corpus, LabelledText,
    SimulationConfig, SimulationReport, Strategy, StrategyComparison, StrategyResult,
};
