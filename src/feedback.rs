//! Annotation feedback: what an annotator submitted and how long it took.
//!
//! Each item contributes independently to the two learners. A missing
//! elapsed time only excludes the item from the cost update; a missing label
//! only excludes it from estimator training.

use serde::{Deserialize, Serialize};

use crate::cost::Interaction;
use crate::estimator::LabelToken;
use crate::ranker::CalLogRanker;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FeedbackItem {
    pub text: String,
    #[serde(default)]
    pub label: Option<LabelToken>,
    #[serde(default, alias = "lead_time")]
    pub elapsed_seconds: Option<f64>,
}

impl FeedbackItem {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            label: None,
            elapsed_seconds: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<LabelToken>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_elapsed(mut self, seconds: f64) -> Self {
        self.elapsed_seconds = Some(seconds);
        self
    }
}

/// Outcome of one `record_feedback` call.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FeedbackResult {
    pub train_step: u64,
    /// Global average after the update.
    pub alpha: f64,
    pub beta: f64,
    pub annotator_id: String,
    pub annotator_alpha: f64,
    pub annotator_beta: f64,
    pub interactions_accepted: usize,
    pub interactions_rejected: usize,
    pub labels_used: usize,
}

/// Feedback split into the inputs of each learner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedbackBatch {
    pub interactions: Vec<Interaction>,
    pub texts: Vec<String>,
    pub labels: Vec<LabelToken>,
}

impl FeedbackBatch {
    pub fn from_items(items: &[FeedbackItem]) -> Self {
        let mut batch = Self::default();
        for item in items {
            if let Some(seconds) = item.elapsed_seconds {
                batch.interactions.push(Interaction::from_seconds(
                    CalLogRanker::word_count(&item.text),
                    seconds,
                ));
            }
            if let Some(label) = &item.label {
                batch.texts.push(item.text.clone());
                batch.labels.push(label.clone());
            }
        }
        batch
    }
}
