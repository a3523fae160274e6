#![forbid(unsafe_code)]

//! # cal-log-harness
//!
//! Decide which unlabelled text an annotator should label next, by expected
//! information per second of their time.
//!
//! An incrementally trained classifier turns each text into a class
//! distribution; its entropy measures how much a label would teach the model.
//! A per-annotator cost model, `seconds = alpha + beta * ln(1 + words)`, is
//! refit from observed annotation times. The CAL-Log score is entropy divided
//! by predicted seconds. Before any training the ranker falls back to
//! cheapest-first ordering so the first labels arrive quickly.
//!
//! [`CalLogService`] owns the shared state and exposes the two host-facing
//! operations, `rank_tasks` and `record_feedback`.

pub mod config;
pub mod cost;
pub mod embedder;
pub mod embedding_cache;
pub mod estimator;
pub mod feedback;
pub mod persist;
pub mod ranker;
pub mod service;
pub mod session;
pub mod simulation;
pub mod trace;

pub use config::{AnnotatorCostPolicy, ConfigError, EngineConfig};
pub use cost::{AdaptiveCostModel, CostModelRegistry, CostParams, Interaction};
pub use embedder::{EmbedError, Embedder, HashingEmbedder};
pub use embedding_cache::{CachedEmbedder, EmbeddingCache, EmbeddingCacheError, SqliteEmbeddingCache};
pub use estimator::{
    ArtifactError, LabelToken, PredictionError, TrainOutcome, UncertaintyEstimator, UpdateOutcome,
};
pub use feedback::{FeedbackItem, FeedbackResult};
pub use ranker::{
    CalLogRanker, RankError, RankRequest, RankResponse, RankedTaskEntry, RankingMode, RankingPhase, Task,
};
pub use service::{CalLogService, ShutdownSummary};
pub use session::{SessionError, SessionState, SessionStore};
pub use trace::{JsonlTraceSink, TraceError, TraceEvent, TraceSink, TraceWorker};
