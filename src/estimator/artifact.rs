//! Estimator model artifact: the learned parameters, class set, and label
//! encoder, persisted separately from session state.

use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::EstimatorConfig;
use crate::persist::{write_json_atomic, FileLock};

use super::classifier::SoftmaxClassifier;
use super::labels::{ClassSet, LabelEncoder};
use super::UncertaintyEstimator;

pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("artifact format version {0} is not supported")]
    UnsupportedVersion(u32),
    #[error("artifact is inconsistent: {0}")]
    Inconsistent(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatorArtifact {
    pub format_version: u32,
    pub num_labels: usize,
    pub classes: Vec<usize>,
    pub encoder: LabelEncoder,
    /// One row per label slot.
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

impl UncertaintyEstimator {
    /// Snapshot of the learned state; `None` while unfitted.
    pub fn to_artifact(&self) -> Option<EstimatorArtifact> {
        let clf = self.classifier.as_ref()?;
        if self.classes.is_empty() {
            return None;
        }
        Some(EstimatorArtifact {
            format_version: ARTIFACT_FORMAT_VERSION,
            num_labels: self.cfg.num_labels,
            classes: self.classes.to_vec(),
            encoder: self.encoder.clone(),
            weights: clf.to_rows(),
            bias: clf.bias(),
        })
    }

    pub fn from_artifact(artifact: EstimatorArtifact, cfg: EstimatorConfig) -> Result<Self, ArtifactError> {
        if artifact.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(ArtifactError::UnsupportedVersion(artifact.format_version));
        }
        if artifact.num_labels != cfg.num_labels {
            return Err(ArtifactError::Inconsistent(format!(
                "artifact has {} labels, config expects {}",
                artifact.num_labels, cfg.num_labels
            )));
        }
        if artifact.weights.len() != cfg.num_labels {
            return Err(ArtifactError::Inconsistent(format!(
                "weight matrix has {} rows, expected {}",
                artifact.weights.len(),
                cfg.num_labels
            )));
        }
        if let Some(bad) = artifact.classes.iter().find(|&&c| c >= cfg.num_labels) {
            return Err(ArtifactError::Inconsistent(format!("class index {bad} out of range")));
        }
        let classifier = SoftmaxClassifier::from_rows(&artifact.weights, &artifact.bias)
            .ok_or_else(|| ArtifactError::Inconsistent("ragged weight matrix or bias".to_string()))?;

        let rng = StdRng::seed_from_u64(cfg.rng_seed);
        Ok(Self {
            cfg,
            classifier: Some(classifier),
            encoder: artifact.encoder,
            classes: artifact.classes.into_iter().collect::<ClassSet>(),
            rng,
        })
    }

    /// Write the artifact atomically. Returns `Ok(false)` without touching
    /// disk when there is nothing fitted to save.
    pub fn save_artifact(&self, path: impl AsRef<Path>) -> Result<bool, ArtifactError> {
        let Some(artifact) = self.to_artifact() else {
            info!("estimator not fitted; skipping artifact save");
            return Ok(false);
        };
        let path = path.as_ref();
        let _lock = FileLock::acquire(path)?;
        write_json_atomic(path, &artifact)?;
        info!(path = %path.display(), classes = artifact.classes.len(), "estimator artifact saved");
        Ok(true)
    }

    pub fn load_artifact(path: impl AsRef<Path>, cfg: EstimatorConfig) -> Result<Self, ArtifactError> {
        let path = path.as_ref();
        let _lock = FileLock::acquire(path)?;
        let raw = std::fs::read_to_string(path)?;
        let artifact: EstimatorArtifact =
            serde_json::from_str(&raw).map_err(|e| ArtifactError::Serde(e.to_string()))?;
        let est = Self::from_artifact(artifact, cfg)?;
        info!(path = %path.display(), "estimator artifact loaded");
        Ok(est)
    }
}
