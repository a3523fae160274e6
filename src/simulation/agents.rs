//! Synthetic annotators with distinct speed and accuracy profiles.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ranker::CalLogRanker;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnnotatorDecision {
    pub label: usize,
    pub elapsed_ms: f64,
    /// The annotator gave up and flagged the item.
    pub ambiguous: bool,
}

pub trait SimulatedAnnotator: Send {
    fn name(&self) -> &str;

    /// Label `text`, whose true class is `truth`, out of `num_labels` classes.
    fn decide(&mut self, text: &str, truth: usize, num_labels: usize, rng: &mut StdRng) -> AnnotatorDecision;

    /// Rest period between rounds. Most annotators do not change.
    fn take_break(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotatorKind {
    Honest,
    Fatigued,
    Spammer,
}

impl AnnotatorKind {
    pub fn build(self) -> Box<dyn SimulatedAnnotator> {
        match self {
            AnnotatorKind::Honest => Box::new(HonestAnnotator::new("honest")),
            AnnotatorKind::Fatigued => Box::new(FatiguedAnnotator::new("fatigued")),
            AnnotatorKind::Spammer => Box::new(SpammerAnnotator::new("spammer")),
        }
    }
}

impl std::str::FromStr for AnnotatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "honest" => Ok(AnnotatorKind::Honest),
            "fatigued" => Ok(AnnotatorKind::Fatigued),
            "spammer" => Ok(AnnotatorKind::Spammer),
            other => Err(format!("unknown annotator kind: {other}")),
        }
    }
}

/// Reads at 200 ms/word after 2–4 s of setup, ±20%, never under 3 s;
/// mislabels 5% of items.
#[derive(Debug, Clone)]
pub struct HonestAnnotator {
    name: String,
}

impl HonestAnnotator {
    pub const MS_PER_WORD: f64 = 200.0;

    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl SimulatedAnnotator for HonestAnnotator {
    fn name(&self) -> &str {
        &self.name
    }

    fn decide(&mut self, text: &str, truth: usize, num_labels: usize, rng: &mut StdRng) -> AnnotatorDecision {
        let words = CalLogRanker::word_count(text) as f64;
        let setup = 2000.0 + rng.gen::<f64>() * 2000.0;
        let variance = 0.8 + rng.gen::<f64>() * 0.4;
        let elapsed_ms = ((words * Self::MS_PER_WORD + setup) * variance).max(3000.0);

        let label = if rng.gen::<f64>() < 0.05 {
            wrong_label(truth, num_labels, rng)
        } else {
            truth
        };
        AnnotatorDecision {
            label,
            elapsed_ms,
            ambiguous: false,
        }
    }
}

/// Slows down and makes more mistakes as energy drains.
#[derive(Debug, Clone)]
pub struct FatiguedAnnotator {
    name: String,
    energy: f64,
}

impl FatiguedAnnotator {
    pub const RECOVERED_ENERGY: f64 = 80.0;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            energy: 100.0,
        }
    }

    pub fn energy(&self) -> f64 {
        self.energy
    }
}

impl SimulatedAnnotator for FatiguedAnnotator {
    fn name(&self) -> &str {
        &self.name
    }

    fn decide(&mut self, text: &str, truth: usize, num_labels: usize, rng: &mut StdRng) -> AnnotatorDecision {
        let drop = if self.energy < 20.0 {
            5.0
        } else if self.energy < 50.0 {
            3.0
        } else {
            2.0
        };
        self.energy = (self.energy - drop).max(0.0);

        let words = CalLogRanker::word_count(text) as f64;
        let fatigue = (100.0 - self.energy) / 100.0;
        let setup = 2000.0 + fatigue * 6000.0 + rng.gen::<f64>() * 1000.0;
        let mut elapsed_ms = words * 200.0 + setup;
        if self.energy < 50.0 {
            elapsed_ms *= 1.5;
        }
        if self.energy < 20.0 {
            elapsed_ms *= 3.0;
        }

        let mistake_chance = if self.energy < 20.0 {
            0.5
        } else if self.energy < 40.0 {
            0.2
        } else {
            0.0
        };
        let label = if rng.gen::<f64>() < mistake_chance {
            wrong_label(truth, num_labels, rng)
        } else {
            truth
        };
        let ambiguous = self.energy < 15.0 && rng.gen::<f64>() < 0.4;

        AnnotatorDecision {
            label,
            elapsed_ms,
            ambiguous,
        }
    }

    /// Breaks never fully restore a tired annotator.
    fn take_break(&mut self) {
        self.energy = Self::RECOVERED_ENERGY;
    }
}

/// Answers at random 70% of the time in 0.5–1.5 s; otherwise answers
/// correctly in 1.5–2.5 s.
#[derive(Debug, Clone)]
pub struct SpammerAnnotator {
    name: String,
}

impl SpammerAnnotator {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl SimulatedAnnotator for SpammerAnnotator {
    fn name(&self) -> &str {
        &self.name
    }

    fn decide(&mut self, _text: &str, truth: usize, num_labels: usize, rng: &mut StdRng) -> AnnotatorDecision {
        if rng.gen::<f64>() < 0.7 {
            AnnotatorDecision {
                label: rng.gen_range(0..num_labels.max(1)),
                elapsed_ms: 500.0 + rng.gen::<f64>() * 1000.0,
                ambiguous: false,
            }
        } else {
            AnnotatorDecision {
                label: truth,
                elapsed_ms: 1500.0 + rng.gen::<f64>() * 1000.0,
                ambiguous: false,
            }
        }
    }
}

/// Uniformly chosen label other than `truth`; `truth` itself when there is
/// no alternative.
fn wrong_label(truth: usize, num_labels: usize, rng: &mut StdRng) -> usize {
    if num_labels < 2 {
        return truth;
    }
    let pick = rng.gen_range(0..num_labels - 1);
    if pick >= truth {
        pick + 1
    } else {
        pick
    }
}
