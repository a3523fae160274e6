//! Request/response types for ranking.

use serde::{Deserialize, Serialize};

use crate::cost::CostParams;

/// Unlabelled item offered for annotation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Task {
    #[serde(alias = "taskId")]
    pub id: String,
    pub text: String,
}

impl Task {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Ranking policy requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingMode {
    ColdStart,
    EntropyOnly,
    CalLog,
}

impl RankingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RankingMode::ColdStart => "cold_start",
            RankingMode::EntropyOnly => "entropy_only",
            RankingMode::CalLog => "cal_log",
        }
    }

    pub fn phase(self) -> RankingPhase {
        match self {
            RankingMode::ColdStart => RankingPhase::ColdStart,
            RankingMode::EntropyOnly => RankingPhase::EntropyOnly,
            RankingMode::CalLog => RankingPhase::CalLog,
        }
    }
}

impl std::str::FromStr for RankingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cold_start" => Ok(RankingMode::ColdStart),
            "entropy_only" => Ok(RankingMode::EntropyOnly),
            "cal_log" => Ok(RankingMode::CalLog),
            other => Err(format!("unknown ranking mode: {other}")),
        }
    }
}

/// Human-readable name of the policy that produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum RankingPhase {
    #[serde(rename = "Cold Start (Cost-Only)")]
    ColdStart,
    #[serde(rename = "Entropy-Only Active")]
    EntropyOnly,
    #[serde(rename = "CAL-Log Active")]
    CalLog,
}

impl RankingPhase {
    pub fn label(self) -> &'static str {
        match self {
            RankingPhase::ColdStart => "Cold Start (Cost-Only)",
            RankingPhase::EntropyOnly => "Entropy-Only Active",
            RankingPhase::CalLog => "CAL-Log Active",
        }
    }
}

/// How redundancy context was applied to the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ContextPenalty {
    None,
    Ignored,
    Adaptive,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Prediction {
    pub label_index: usize,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CostAnalysis {
    pub predicted_seconds: f64,
    pub context_penalty: ContextPenalty,
}

/// Raw quantities behind the final score.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MathProof {
    pub entropy: f64,
    pub redundancy_penalty: f64,
    pub cal_log_score: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TransparencyReport {
    pub phase: RankingPhase,
    pub cost_analysis: CostAnalysis,
    pub math_proof: MathProof,
}

/// One ranked task. Recomputed on every call, never persisted.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RankedTaskEntry {
    pub id: String,
    pub text: String,
    pub score: f64,
    pub prediction: Prediction,
    pub transparency_report: TransparencyReport,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RankRequest {
    pub tasks: Vec<Task>,
    #[serde(default = "default_mode")]
    pub mode: RankingMode,
    /// One redundancy factor per task, in `[0, 1]`.
    #[serde(default)]
    pub penalties: Option<Vec<f64>>,
    /// Requesting annotator, when known.
    #[serde(default)]
    pub annotator_id: Option<String>,
}

fn default_mode() -> RankingMode {
    RankingMode::CalLog
}

/// Which parameters priced the tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CostParamsSource {
    Global,
    Annotator,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CostParamsUsed {
    pub alpha: f64,
    pub beta: f64,
    pub source: CostParamsSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotator_id: Option<String>,
}

impl CostParamsUsed {
    pub fn params(&self) -> CostParams {
        CostParams::new(self.alpha, self.beta)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RankResponse {
    /// `CAL-Log-v{train_step}`.
    pub model_version: String,
    pub train_step: u64,
    /// Mode that actually produced `entries`.
    pub mode: RankingMode,
    pub requested_mode: RankingMode,
    /// Set when the requested mode could not be served.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub cost_params: CostParamsUsed,
    pub entries: Vec<RankedTaskEntry>,
}

pub fn model_version(train_step: u64) -> String {
    format!("CAL-Log-v{train_step}")
}
