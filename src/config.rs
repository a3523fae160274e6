//! Engine configuration: estimator, cost model, ranker, and storage paths.
//!
//! Every field has a default so a partial JSON file (or none at all) is a
//! valid configuration. Paths can additionally be overridden from the
//! environment, which is how the CLI and host integrations point several
//! processes at the same state file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const ENV_STATE_PATH: &str = "CAL_LOG_STATE_PATH";
pub const ENV_MODEL_PATH: &str = "CAL_LOG_MODEL_PATH";
pub const ENV_EMBED_CACHE_PATH: &str = "CAL_LOG_EMBED_CACHE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------
//  Sections
// ---------------------------------------------------------------------

/// Uncertainty estimator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Width of every probability distribution the estimator emits.
    pub num_labels: usize,
    /// SGD step size. Embeddings are unit-normalised, so 0.5 converges in a
    /// handful of epochs without overshooting.
    pub learning_rate: f64,
    /// L2 weight decay applied on every SGD step.
    pub l2_penalty: f64,
    /// Epochs used by `train` when the caller does not specify any.
    pub default_epochs: usize,
    /// Minimum batch size for a full (re)train.
    pub min_train_samples: usize,
    /// Seed for per-epoch reshuffling.
    pub rng_seed: u64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            num_labels: 4,
            learning_rate: 0.5,
            l2_penalty: 1e-4,
            default_epochs: 3,
            min_train_samples: 2,
            rng_seed: 42,
        }
    }
}

/// Per-annotator cost model settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    /// Fixed overhead (seconds) for a fresh annotator.
    pub default_alpha: f64,
    /// Seconds per log-unit of word count for a fresh annotator.
    pub default_beta: f64,
    /// Most recent observations kept per annotator.
    pub history_window: usize,
    /// Observations at or above this many seconds are treated as idle time.
    pub outlier_seconds: f64,
    /// Lower clamp for both fitted parameters.
    pub param_floor: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            default_alpha: 5.0,
            default_beta: 3.0,
            history_window: 50,
            outlier_seconds: 300.0,
            param_floor: 0.1,
        }
    }
}

/// Ranking policy settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RankerConfig {
    /// Added inside `log` when computing entropy.
    pub entropy_epsilon: f64,
    /// Maximum entries returned by the cold-start policy.
    pub cold_start_limit: usize,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            entropy_epsilon: 1e-9,
            cold_start_limit: 50,
        }
    }
}

/// Settings for the bundled feature-hashing embedder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub dimension: usize,
    /// Folded into embedding cache keys so vectors from different models never mix.
    pub model_name: String,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            dimension: 256,
            model_name: "feature-hash-v1".to_string(),
        }
    }
}

/// Which cost parameters price a ranking request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotatorCostPolicy {
    /// Always rank with the registry-wide average.
    Global,
    /// Use the requesting annotator's own parameters once that annotator has
    /// at least one accepted observation; global average before that.
    #[default]
    PerAnnotatorWhenKnown,
}

// ---------------------------------------------------------------------
//  EngineConfig
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub estimator: EstimatorConfig,
    pub cost: CostConfig,
    pub ranker: RankerConfig,
    pub embedder: EmbedderConfig,
    pub annotator_cost_policy: AnnotatorCostPolicy,
    /// Session state (train step + per-annotator parameters).
    pub state_path: PathBuf,
    /// Estimator artifact. `None` keeps the estimator in memory only.
    pub model_path: Option<PathBuf>,
    pub embedding_cache_path: Option<PathBuf>,
    pub trace_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorConfig::default(),
            cost: CostConfig::default(),
            ranker: RankerConfig::default(),
            embedder: EmbedderConfig::default(),
            annotator_cost_policy: AnnotatorCostPolicy::default(),
            state_path: default_state_path(),
            model_path: None,
            embedding_cache_path: None,
            trace_path: None,
        }
    }
}

pub fn default_state_path() -> PathBuf {
    PathBuf::from(".cal_log_state.json")
}

impl EngineConfig {
    /// Read a JSON config file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let cfg: EngineConfig = serde_json::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Override storage paths from `CAL_LOG_*` environment variables.
    pub fn apply_env(mut self) -> Self {
        if let Ok(path) = std::env::var(ENV_STATE_PATH) {
            self.state_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var(ENV_MODEL_PATH) {
            self.model_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var(ENV_EMBED_CACHE_PATH) {
            self.embedding_cache_path = Some(PathBuf::from(path));
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let e = &self.estimator;
        if e.num_labels < 2 {
            return invalid("estimator.num_labels must be >= 2");
        }
        if !(e.learning_rate.is_finite() && e.learning_rate > 0.0) {
            return invalid("estimator.learning_rate must be > 0");
        }
        if !(e.l2_penalty.is_finite() && e.l2_penalty >= 0.0) {
            return invalid("estimator.l2_penalty must be >= 0");
        }
        if e.default_epochs == 0 {
            return invalid("estimator.default_epochs must be >= 1");
        }
        if e.min_train_samples == 0 {
            return invalid("estimator.min_train_samples must be >= 1");
        }

        let c = &self.cost;
        if !(c.default_alpha > 0.0 && c.default_beta > 0.0) {
            return invalid("cost.default_alpha and cost.default_beta must be > 0");
        }
        if c.history_window == 0 {
            return invalid("cost.history_window must be >= 1");
        }
        if !(c.outlier_seconds > 0.0) {
            return invalid("cost.outlier_seconds must be > 0");
        }
        if !(c.param_floor > 0.0) {
            return invalid("cost.param_floor must be > 0");
        }

        let r = &self.ranker;
        if !(r.entropy_epsilon > 0.0 && r.entropy_epsilon.is_finite()) {
            return invalid("ranker.entropy_epsilon must be > 0");
        }
        if r.cold_start_limit == 0 {
            return invalid("ranker.cold_start_limit must be >= 1");
        }

        if self.embedder.dimension == 0 {
            return invalid("embedder.dimension must be >= 1");
        }
        if self.embedder.model_name.trim().is_empty() {
            return invalid("embedder.model_name must be non-empty");
        }
        Ok(())
    }
}

fn invalid<T>(msg: &str) -> Result<T, ConfigError> {
    Err(ConfigError::Invalid(msg.to_string()))
}
