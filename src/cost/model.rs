//! Per-annotator annotation-time model: `seconds = alpha + beta * ln(1 + words)`.
//!
//! Parameters are refit by ordinary least squares over a bounded window of
//! recent observations. Observations at or past the outlier threshold are
//! treated as idle time and never enter the window.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CostConfig;

/// One observed annotation: how many words the text had and how long it took.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub length: usize,
    pub elapsed_ms: f64,
}

impl Interaction {
    pub fn from_seconds(length: usize, elapsed_seconds: f64) -> Self {
        Self {
            length,
            elapsed_ms: elapsed_seconds * 1000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostParams {
    pub alpha: f64,
    pub beta: f64,
}

impl CostParams {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }

    pub fn predict(&self, length: usize) -> f64 {
        self.alpha + self.beta * (length as f64).ln_1p()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostUpdateSummary {
    pub accepted: usize,
    pub rejected: usize,
    /// Whether alpha/beta were recomputed.
    pub refit: bool,
}

#[derive(Debug, Clone)]
pub struct AdaptiveCostModel {
    params: CostParams,
    /// `(ln(1 + length), seconds)`, oldest first.
    history: VecDeque<(f64, f64)>,
    window: usize,
    outlier_seconds: f64,
    floor: f64,
}

impl AdaptiveCostModel {
    pub fn new(cfg: &CostConfig) -> Self {
        Self::with_params(cfg, CostParams::new(cfg.default_alpha, cfg.default_beta))
    }

    /// Model seeded with restored parameters and an empty history.
    pub fn with_params(cfg: &CostConfig, params: CostParams) -> Self {
        Self {
            params,
            history: VecDeque::with_capacity(cfg.history_window),
            window: cfg.history_window.max(1),
            outlier_seconds: cfg.outlier_seconds,
            floor: cfg.param_floor,
        }
    }

    pub fn params(&self) -> CostParams {
        self.params
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Observations currently in the window, oldest first.
    pub fn history(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.history.iter().copied()
    }

    pub fn predict_one(&self, length: usize) -> f64 {
        self.params.predict(length)
    }

    pub fn predict(&self, lengths: &[usize]) -> Vec<f64> {
        lengths.iter().map(|&l| self.predict_one(l)).collect()
    }

    /// Record the usable interactions and refit. With nothing in the window
    /// the parameters stay where they were.
    pub fn update(&mut self, interactions: &[Interaction]) -> CostUpdateSummary {
        let mut summary = CostUpdateSummary::default();
        for it in interactions {
            let seconds = it.elapsed_ms / 1000.0;
            if !seconds.is_finite() || seconds < 0.0 || seconds >= self.outlier_seconds {
                debug!(length = it.length, seconds, "rejecting cost observation");
                summary.rejected += 1;
                continue;
            }
            if self.history.len() == self.window {
                self.history.pop_front();
            }
            self.history.push_back(((it.length as f64).ln_1p(), seconds));
            summary.accepted += 1;
        }

        if let Some((alpha, beta)) = ols_fit(self.history.iter().copied()) {
            self.params = CostParams::new(alpha.max(self.floor), beta.max(self.floor));
            summary.refit = true;
        }
        summary
    }
}

/// Least-squares intercept and slope. A window with no spread in `x`
/// yields slope 0 and the mean of `y`.
fn ols_fit(points: impl Iterator<Item = (f64, f64)>) -> Option<(f64, f64)> {
    let pts: Vec<(f64, f64)> = points.collect();
    if pts.is_empty() {
        return None;
    }
    let n = pts.len() as f64;
    let mean_x = pts.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pts.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = pts.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    let sxy: f64 = pts.iter().map(|(x, y)| (x - mean_x) * (y - mean_y)).sum();

    if sxx <= f64::EPSILON {
        return Some((mean_y, 0.0));
    }
    let beta = sxy / sxx;
    Some((mean_y - beta * mean_x, beta))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> AdaptiveCostModel {
        AdaptiveCostModel::new(&CostConfig::default())
    }

    #[test]
    fn defaults_predict_from_log_length() {
        let m = model();
        assert!((m.predict_one(0) - 5.0).abs() < 1e-12);
        let expected = 5.0 + 3.0 * 10f64.ln_1p();
        assert!((m.predict_one(10) - expected).abs() < 1e-12);
    }

    #[test]
    fn ols_recovers_exact_line() {
        let pts = [(0.0, 2.0), (1.0, 5.0), (2.0, 8.0)];
        let (a, b) = ols_fit(pts.into_iter()).unwrap();
        assert!((a - 2.0).abs() < 1e-9);
        assert!((b - 3.0).abs() < 1e-9);
    }

    #[test]
    fn single_observation_sets_alpha_to_its_time() {
        let mut m = model();
        let s = m.update(&[Interaction::from_seconds(10, 12.0)]);
        assert_eq!(s, CostUpdateSummary { accepted: 1, rejected: 0, refit: true });
        assert!((m.params().alpha - 12.0).abs() < 1e-9);
        assert!((m.params().beta - 0.1).abs() < 1e-12);
    }

    #[test]
    fn outlier_only_batch_changes_nothing() {
        let mut m = model();
        let s = m.update(&[Interaction::from_seconds(10, 300.0)]);
        assert_eq!(s, CostUpdateSummary { accepted: 0, rejected: 1, refit: false });
        assert_eq!(m.params(), CostParams::new(5.0, 3.0));
        assert_eq!(m.history_len(), 0);
    }

    #[test]
    fn negative_and_nan_times_are_rejected() {
        let mut m = model();
        let s = m.update(&[
            Interaction { length: 5, elapsed_ms: -1.0 },
            Interaction { length: 5, elapsed_ms: f64::NAN },
        ]);
        assert_eq!(s.rejected, 2);
        assert_eq!(m.history_len(), 0);
    }

    #[test]
    fn window_drops_oldest() {
        let mut m = model();
        let batch: Vec<Interaction> = (0..60).map(|i| Interaction::from_seconds(i, 4.0)).collect();
        m.update(&batch);
        assert_eq!(m.history_len(), 50);
        let first = m.history().next().unwrap();
        assert!((first.0 - 10f64.ln_1p()).abs() < 1e-12);
    }

    #[test]
    fn faster_than_floor_is_clamped() {
        let mut m = model();
        let batch: Vec<Interaction> = [1usize, 5, 20, 80]
            .iter()
            .map(|&l| Interaction::from_seconds(l, 0.01))
            .collect();
        m.update(&batch);
        assert!(m.params().alpha >= 0.1);
        assert!(m.params().beta >= 0.1);
    }
}
