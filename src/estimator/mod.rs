//! Uncertainty estimator: embeddings in, calibrated class distributions out.
//!
//! Lifecycle:
//! - **Unfitted**: every prediction is the uniform distribution.
//! - **Fitted**: a [`SoftmaxClassifier`] over every class in the schema. Once
//!   fitted the estimator never goes back; `train` and `partial_update` only
//!   extend what it knows.
//!
//! All output-shape logic keys off `num_labels` and the explicit [`ClassSet`],
//! never off what the classifier happens to contain.

pub mod artifact;
pub mod classifier;
pub mod labels;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EstimatorConfig;

pub use artifact::{ArtifactError, EstimatorArtifact};
pub use classifier::SoftmaxClassifier;
pub use labels::{ClassSet, LabelEncoder, LabelToken};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PredictionError {
    #[error("embedding dimension {got} does not match classifier dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("classifier produced a non-finite distribution")]
    NonFinite,
    #[error("classifier has no active classes")]
    EmptyClassSet,
}

/// Result of a full training run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainOutcome {
    Trained {
        accuracy: f64,
        num_samples: usize,
        epochs: usize,
    },
    /// Too few usable samples; nothing was changed.
    InsufficientData { required: usize, provided: usize },
}

/// Result of an incremental update.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateOutcome {
    Updated { num_samples: usize, classes_widened: bool },
    /// No usable samples in the batch.
    Empty,
}

#[derive(Debug, Clone)]
pub struct UncertaintyEstimator {
    cfg: EstimatorConfig,
    classifier: Option<SoftmaxClassifier>,
    encoder: LabelEncoder,
    classes: ClassSet,
    rng: StdRng,
}

impl UncertaintyEstimator {
    pub fn new(cfg: EstimatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(cfg.rng_seed);
        Self {
            cfg,
            classifier: None,
            encoder: LabelEncoder::new(),
            classes: ClassSet::new(),
            rng,
        }
    }

    pub fn num_labels(&self) -> usize {
        self.cfg.num_labels
    }

    pub fn is_fitted(&self) -> bool {
        self.classifier.is_some() && !self.classes.is_empty()
    }

    pub fn classes(&self) -> &ClassSet {
        &self.classes
    }

    pub fn label_encoder(&self) -> &LabelEncoder {
        &self.encoder
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.cfg
    }

    pub fn uniform(&self) -> Vec<f64> {
        uniform(self.cfg.num_labels)
    }

    // -----------------------------------------------------------------
    //  Prediction
    // -----------------------------------------------------------------

    /// One `num_labels`-wide distribution per embedding.
    ///
    /// Unfitted estimators return uniform rows. Errors are returned, not
    /// swallowed; substituting a fallback is the caller's decision.
    pub fn predict_proba(&self, embeddings: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, PredictionError> {
        let clf = match (&self.classifier, self.classes.is_empty()) {
            (Some(clf), false) => clf,
            _ => return Ok(vec![self.uniform(); embeddings.len()]),
        };
        let mut out = Vec::with_capacity(embeddings.len());
        for x in embeddings {
            out.push(clf.predict(x, &self.classes)?);
        }
        Ok(out)
    }

    /// Argmax class per embedding.
    pub fn predict(&self, embeddings: &[Vec<f64>]) -> Result<Vec<usize>, PredictionError> {
        Ok(self
            .predict_proba(embeddings)?
            .iter()
            .map(|p| argmax(p).0)
            .collect())
    }

    // -----------------------------------------------------------------
    //  Training
    // -----------------------------------------------------------------

    /// Multi-epoch fit on a labelled batch, reshuffled every epoch.
    pub fn train(&mut self, embeddings: &[Vec<f64>], labels: &[LabelToken], epochs: usize) -> TrainOutcome {
        let (encoder, xs, ys) = self.encode_batch(embeddings, labels);
        let required = self.cfg.min_train_samples.max(1);
        if xs.len() < required {
            warn!(required, provided = xs.len(), "not enough labelled samples to train");
            return TrainOutcome::InsufficientData {
                required,
                provided: xs.len(),
            };
        }
        self.encoder = encoder;
        self.ensure_classifier(&xs);

        self.seed_classes();
        self.classes.widen(ys.iter().copied());

        let epochs = epochs.max(1);
        let mut order: Vec<usize> = (0..xs.len()).collect();
        if let Some(clf) = self.classifier.as_mut() {
            for _ in 0..epochs {
                order.shuffle(&mut self.rng);
                clf.fit_pass(&xs, &ys, &order, &self.classes, self.cfg.learning_rate, self.cfg.l2_penalty);
            }
        }

        let accuracy = self.batch_accuracy(&xs, &ys);
        info!(
            accuracy,
            samples = xs.len(),
            epochs,
            classes = self.classes.len(),
            "estimator training complete"
        );
        TrainOutcome::Trained {
            accuracy,
            num_samples: xs.len(),
            epochs,
        }
    }

    /// Single incremental pass against the current (possibly widened) class set.
    pub fn partial_update(&mut self, embeddings: &[Vec<f64>], labels: &[LabelToken]) -> UpdateOutcome {
        let (encoder, xs, ys) = self.encode_batch(embeddings, labels);
        if xs.is_empty() {
            return UpdateOutcome::Empty;
        }
        self.encoder = encoder;
        self.ensure_classifier(&xs);

        let seeded = self.seed_classes();
        let classes_widened = self.classes.widen(ys.iter().copied()) || seeded;
        let order: Vec<usize> = (0..xs.len()).collect();
        if let Some(clf) = self.classifier.as_mut() {
            clf.fit_pass(&xs, &ys, &order, &self.classes, self.cfg.learning_rate, self.cfg.l2_penalty);
        }
        debug!(samples = xs.len(), classes_widened, "incremental estimator update");
        UpdateOutcome::Updated {
            num_samples: xs.len(),
            classes_widened,
        }
    }

    /// Resolve labels against a copy of the encoder extended with any novel
    /// names, keeping only pairs whose index fits the label schema and whose
    /// embedding matches the classifier dimension. The caller commits the
    /// returned encoder only if it goes on to use the batch.
    fn encode_batch(
        &self,
        embeddings: &[Vec<f64>],
        labels: &[LabelToken],
    ) -> (LabelEncoder, Vec<Vec<f64>>, Vec<usize>) {
        let n = self.cfg.num_labels;
        let mut encoder = self.encoder.clone();
        if encoder.is_empty() {
            encoder.fit_initial(labels, n);
        } else {
            encoder.extend(labels, n);
        }

        let expected_dim = self
            .classifier
            .as_ref()
            .map(|c| c.dim())
            .or_else(|| embeddings.first().map(|e| e.len()));

        let mut xs = Vec::with_capacity(labels.len());
        let mut ys = Vec::with_capacity(labels.len());
        for (x, label) in embeddings.iter().zip(labels) {
            let Some(idx) = encoder.encode(label, n) else {
                warn!(?label, num_labels = n, "skipping sample with label outside the schema");
                continue;
            };
            if Some(x.len()) != expected_dim || x.is_empty() || x.iter().any(|v| !v.is_finite()) {
                warn!(dim = x.len(), ?expected_dim, "skipping sample with unusable embedding");
                continue;
            }
            xs.push(x.clone());
            ys.push(idx);
        }
        (encoder, xs, ys)
    }

    /// First fit covers the whole label schema, so a single-label batch
    /// cannot collapse predictions onto one class.
    fn seed_classes(&mut self) -> bool {
        if self.classes.is_empty() {
            self.classes.widen(0..self.cfg.num_labels)
        } else {
            false
        }
    }

    fn ensure_classifier(&mut self, xs: &[Vec<f64>]) {
        if self.classifier.is_none() {
            if let Some(dim) = xs.first().map(|x| x.len()) {
                self.classifier = Some(SoftmaxClassifier::new(self.cfg.num_labels, dim));
            }
        }
    }

    fn batch_accuracy(&self, xs: &[Vec<f64>], ys: &[usize]) -> f64 {
        match self.predict(xs) {
            Ok(pred) if !ys.is_empty() => {
                let hits = pred.iter().zip(ys).filter(|(p, y)| p == y).count();
                hits as f64 / ys.len() as f64
            }
            _ => 0.0,
        }
    }
}

/// Uniform distribution of width `n`.
pub fn uniform(n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    vec![1.0 / n as f64; n]
}

/// `(index, value)` of the largest entry; first index wins ties.
pub fn argmax(p: &[f64]) -> (usize, f64) {
    let mut best = (0, f64::NEG_INFINITY);
    for (i, &v) in p.iter().enumerate() {
        if v > best.1 {
            best = (i, v);
        }
    }
    if best.1 == f64::NEG_INFINITY {
        (0, 0.0)
    } else {
        best
    }
}
