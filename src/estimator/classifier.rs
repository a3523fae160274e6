//! Multinomial logistic regression trained by per-sample SGD.
//!
//! Weights are held for every label slot from the start; only the classes in
//! the caller's [`ClassSet`] take part in the softmax, so widening the set
//! never discards what was already learned.

use nalgebra::{DMatrix, DVector};

use super::labels::ClassSet;
use super::PredictionError;

#[derive(Debug, Clone)]
pub struct SoftmaxClassifier {
    /// `num_labels × dim`.
    weights: DMatrix<f64>,
    bias: DVector<f64>,
}

impl SoftmaxClassifier {
    pub fn new(num_labels: usize, dim: usize) -> Self {
        Self {
            weights: DMatrix::zeros(num_labels, dim),
            bias: DVector::zeros(num_labels),
        }
    }

    /// Rebuild from serialized rows. Returns `None` on ragged or mismatched input.
    pub fn from_rows(rows: &[Vec<f64>], bias: &[f64]) -> Option<Self> {
        let num_labels = rows.len();
        if num_labels == 0 || bias.len() != num_labels {
            return None;
        }
        let dim = rows[0].len();
        if rows.iter().any(|r| r.len() != dim) {
            return None;
        }
        let flat: Vec<f64> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Some(Self {
            weights: DMatrix::from_row_slice(num_labels, dim, &flat),
            bias: DVector::from_column_slice(bias),
        })
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.weights
            .row_iter()
            .map(|row| row.iter().copied().collect())
            .collect()
    }

    pub fn bias(&self) -> Vec<f64> {
        self.bias.iter().copied().collect()
    }

    pub fn num_labels(&self) -> usize {
        self.weights.nrows()
    }

    pub fn dim(&self) -> usize {
        self.weights.ncols()
    }

    /// Full-width distribution: softmax over `classes`, zero elsewhere,
    /// renormalised.
    pub fn predict(&self, x: &[f64], classes: &ClassSet) -> Result<Vec<f64>, PredictionError> {
        if x.len() != self.dim() {
            return Err(PredictionError::DimensionMismatch {
                expected: self.dim(),
                got: x.len(),
            });
        }
        if classes.is_empty() {
            return Err(PredictionError::EmptyClassSet);
        }

        let active = self.active_softmax(x, classes);
        let mut out = vec![0.0; self.num_labels()];
        for (k, p) in active {
            out[k] = p;
        }

        let total: f64 = out.iter().sum();
        if !total.is_finite() || total <= 0.0 {
            return Err(PredictionError::NonFinite);
        }
        for p in &mut out {
            *p /= total;
        }
        Ok(out)
    }

    /// One SGD pass over `xs` in the given `order`.
    pub fn fit_pass(
        &mut self,
        xs: &[Vec<f64>],
        ys: &[usize],
        order: &[usize],
        classes: &ClassSet,
        learning_rate: f64,
        l2_penalty: f64,
    ) {
        for &i in order {
            self.sgd_step(&xs[i], ys[i], classes, learning_rate, l2_penalty);
        }
    }

    fn sgd_step(&mut self, x: &[f64], target: usize, classes: &ClassSet, lr: f64, l2: f64) {
        let probs = self.active_softmax(x, classes);
        let decay = 1.0 - lr * l2;
        for (k, p) in probs {
            let err = p - if k == target { 1.0 } else { 0.0 };
            let step = lr * err;
            for (j, xj) in x.iter().enumerate() {
                let w = self.weights[(k, j)];
                self.weights[(k, j)] = w * decay - step * xj;
            }
            self.bias[k] -= step;
        }
    }

    /// `(class, probability)` for active classes that fit in the weight matrix.
    fn active_softmax(&self, x: &[f64], classes: &ClassSet) -> Vec<(usize, f64)> {
        let xv = DVector::from_column_slice(x);
        let logits: Vec<(usize, f64)> = classes
            .iter()
            .filter(|&k| k < self.num_labels())
            .map(|k| (k, self.weights.row(k).transpose().dot(&xv) + self.bias[k]))
            .collect();

        let max = logits
            .iter()
            .map(|(_, z)| *z)
            .fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<(usize, f64)> = logits.iter().map(|(k, z)| (*k, (z - max).exp())).collect();
        let sum: f64 = exps.iter().map(|(_, e)| e).sum();
        exps.into_iter().map(|(k, e)| (k, e / sum)).collect()
    }
}
