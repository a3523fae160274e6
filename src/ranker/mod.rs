//! CAL-Log ranking: information value (entropy) per predicted annotation second.
//!
//! Three policies share one output shape:
//! - **cold start**: cheapest first, score `1 / cost`, capped at
//!   `cold_start_limit` entries.
//! - **entropy only**: most uncertain first, cost reported but unused.
//! - **CAL-Log**: `entropy / cost`, optionally scaled by a redundancy penalty.
//!
//! All sorts are stable, so tied scores keep their input order.

pub mod report;
pub mod types;

use std::cmp::Ordering;

use tracing::warn;

use crate::config::RankerConfig;
use crate::cost::CostParams;
use crate::estimator::{argmax, uniform};

pub use report::{build_report, render_report_markdown, RankReport, RankReportOptions};
pub use types::{
    model_version, ContextPenalty, CostAnalysis, CostParamsSource, CostParamsUsed, MathProof,
    Prediction, RankRequest, RankResponse, RankedTaskEntry, RankingMode, RankingPhase, Task,
    TransparencyReport,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RankError {
    #[error("{tasks} tasks but {rows} probability rows")]
    ShapeMismatch { tasks: usize, rows: usize },
    #[error("probability row {row} has width {got}, expected {expected}")]
    LabelWidthMismatch { row: usize, expected: usize, got: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct CalLogRanker {
    cfg: RankerConfig,
}

impl Default for CalLogRanker {
    fn default() -> Self {
        Self::new(RankerConfig::default())
    }
}

impl CalLogRanker {
    pub fn new(cfg: RankerConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &RankerConfig {
        &self.cfg
    }

    /// `-Σ p log(p + ε)`.
    pub fn entropy(&self, p: &[f64]) -> f64 {
        entropy(p, self.cfg.entropy_epsilon)
    }

    pub fn word_count(text: &str) -> usize {
        text.split_whitespace().count()
    }

    pub fn predicted_costs(&self, tasks: &[Task], params: CostParams) -> Vec<f64> {
        tasks
            .iter()
            .map(|t| params.predict(Self::word_count(&t.text)))
            .collect()
    }

    /// Cheapest first. Entropy and redundancy are fixed at 0.0 and 1.0 in
    /// the report; the prediction is the uniform argmax.
    pub fn rank_cold_start(&self, tasks: &[Task], params: CostParams, num_labels: usize) -> Vec<RankedTaskEntry> {
        let costs = self.predicted_costs(tasks, params);
        let mut order: Vec<usize> = (0..tasks.len()).collect();
        order.sort_by(|&a, &b| costs[a].partial_cmp(&costs[b]).unwrap_or(Ordering::Equal));

        let (label_index, confidence) = argmax(&uniform(num_labels));
        order
            .into_iter()
            .take(self.cfg.cold_start_limit)
            .map(|i| {
                let cost = costs[i];
                let score = if cost > 0.0 { 1.0 / cost } else { 0.0 };
                entry(
                    &tasks[i],
                    score,
                    Prediction {
                        label_index,
                        confidence,
                    },
                    TransparencyReport {
                        phase: RankingPhase::ColdStart,
                        cost_analysis: CostAnalysis {
                            predicted_seconds: cost,
                            context_penalty: ContextPenalty::None,
                        },
                        math_proof: MathProof {
                            entropy: 0.0,
                            redundancy_penalty: 1.0,
                            cal_log_score: 0.0,
                        },
                    },
                )
            })
            .collect()
    }

    /// Most uncertain first; zero-entropy tasks are dropped.
    pub fn rank_entropy_only(
        &self,
        tasks: &[Task],
        probabilities: &[Vec<f64>],
        params: CostParams,
    ) -> Result<Vec<RankedTaskEntry>, RankError> {
        check_shape(tasks, probabilities)?;
        let costs = self.predicted_costs(tasks, params);
        let entropies: Vec<f64> = probabilities.iter().map(|p| self.entropy(p)).collect();

        Ok(descending(&entropies)
            .into_iter()
            .filter(|&i| entropies[i] > 0.0)
            .map(|i| {
                entry(
                    &tasks[i],
                    entropies[i],
                    prediction(&probabilities[i]),
                    TransparencyReport {
                        phase: RankingPhase::EntropyOnly,
                        cost_analysis: CostAnalysis {
                            predicted_seconds: costs[i],
                            context_penalty: ContextPenalty::Ignored,
                        },
                        math_proof: MathProof {
                            entropy: entropies[i],
                            redundancy_penalty: 1.0,
                            cal_log_score: 0.0,
                        },
                    },
                )
            })
            .collect())
    }

    /// `entropy / cost × penalty`, highest first; non-positive scores are dropped.
    pub fn rank_cal_log(
        &self,
        tasks: &[Task],
        probabilities: &[Vec<f64>],
        params: CostParams,
        penalties: Option<&[f64]>,
    ) -> Result<Vec<RankedTaskEntry>, RankError> {
        check_shape(tasks, probabilities)?;
        let costs = self.predicted_costs(tasks, params);
        let penalties = normalize_penalties(penalties, tasks.len());

        let entropies: Vec<f64> = probabilities.iter().map(|p| self.entropy(p)).collect();
        let raw: Vec<f64> = entropies.iter().zip(&costs).map(|(h, c)| h / c).collect();
        let finals: Vec<f64> = raw.iter().zip(&penalties).map(|(s, w)| s * w).collect();

        Ok(descending(&finals)
            .into_iter()
            .filter(|&i| finals[i] > 0.0)
            .map(|i| {
                entry(
                    &tasks[i],
                    finals[i],
                    prediction(&probabilities[i]),
                    TransparencyReport {
                        phase: RankingPhase::CalLog,
                        cost_analysis: CostAnalysis {
                            predicted_seconds: costs[i],
                            context_penalty: ContextPenalty::Adaptive,
                        },
                        math_proof: MathProof {
                            entropy: entropies[i],
                            redundancy_penalty: penalties[i],
                            cal_log_score: raw[i],
                        },
                    },
                )
            })
            .collect())
    }
}

pub fn entropy(p: &[f64], epsilon: f64) -> f64 {
    -p.iter().map(|&pi| pi * (pi + epsilon).ln()).sum::<f64>()
}

/// Clamp each penalty into `[0, 1]` (non-finite → 1.0). A vector of the
/// wrong length is ignored.
pub fn normalize_penalties(penalties: Option<&[f64]>, n: usize) -> Vec<f64> {
    match penalties {
        Some(p) if p.len() == n => p
            .iter()
            .map(|&w| if w.is_finite() { w.clamp(0.0, 1.0) } else { 1.0 })
            .collect(),
        Some(p) => {
            warn!(expected = n, got = p.len(), "ignoring penalty vector of the wrong length");
            vec![1.0; n]
        }
        None => vec![1.0; n],
    }
}

fn check_shape(tasks: &[Task], probabilities: &[Vec<f64>]) -> Result<(), RankError> {
    if tasks.len() != probabilities.len() {
        return Err(RankError::ShapeMismatch {
            tasks: tasks.len(),
            rows: probabilities.len(),
        });
    }
    if let Some(first) = probabilities.first() {
        let expected = first.len();
        for (row, p) in probabilities.iter().enumerate() {
            if p.len() != expected || p.is_empty() {
                return Err(RankError::LabelWidthMismatch {
                    row,
                    expected,
                    got: p.len(),
                });
            }
        }
    }
    Ok(())
}

/// Indices by descending value; stable for ties.
fn descending(values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].partial_cmp(&values[a]).unwrap_or(Ordering::Equal));
    order
}

fn prediction(p: &[f64]) -> Prediction {
    let (label_index, confidence) = argmax(p);
    Prediction {
        label_index,
        confidence,
    }
}

fn entry(task: &Task, score: f64, prediction: Prediction, report: TransparencyReport) -> RankedTaskEntry {
    RankedTaskEntry {
        id: task.id.clone(),
        text: task.text.clone(),
        score,
        prediction,
        transparency_report: report,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> CostParams {
        CostParams::new(5.0, 3.0)
    }

    #[test]
    fn entropy_of_uniform_is_log_n() {
        let h = entropy(&[0.25; 4], 1e-9);
        assert!((h - 4f64.ln()).abs() < 1e-6);
    }

    #[test]
    fn one_hot_entropy_is_not_positive() {
        assert!(entropy(&[1.0, 0.0, 0.0], 1e-9) <= 0.0);
    }

    #[test]
    fn penalties_are_clamped_and_wrong_length_ignored() {
        assert_eq!(
            normalize_penalties(Some(&[1.5, -0.2, f64::NAN, 0.4]), 4),
            vec![1.0, 0.0, 1.0, 0.4]
        );
        assert_eq!(normalize_penalties(Some(&[0.5]), 2), vec![1.0, 1.0]);
    }

    #[test]
    fn ties_keep_input_order() {
        let ranker = CalLogRanker::default();
        let tasks = vec![Task::new("a", "same words"), Task::new("b", "same words")];
        let probs = vec![vec![0.5, 0.5], vec![0.5, 0.5]];
        let out = ranker.rank_cal_log(&tasks, &probs, params(), None).unwrap();
        assert_eq!(out[0].id, "a");
        assert_eq!(out[1].id, "b");
    }

    #[test]
    fn cold_start_is_capped() {
        let ranker = CalLogRanker::new(RankerConfig {
            cold_start_limit: 2,
            ..RankerConfig::default()
        });
        let tasks: Vec<Task> = (0..5).map(|i| Task::new(i.to_string(), "x")).collect();
        assert_eq!(ranker.rank_cold_start(&tasks, params(), 4).len(), 2);
    }

    #[test]
    fn shape_mismatch_is_reported() {
        let ranker = CalLogRanker::default();
        let err = ranker
            .rank_entropy_only(&[Task::new("a", "x")], &[], params())
            .unwrap_err();
        assert_eq!(err, RankError::ShapeMismatch { tasks: 1, rows: 0 });
    }
}
