//! Offline strategy comparison.
//!
//! Runs the real estimator, registry, and ranker against a synthetic topic
//! corpus, with a simulated annotator standing in for the human. Every
//! strategy sees the same corpus and the same annotator seed, so the only
//! thing that differs between runs is which tasks get picked.

use std::collections::HashMap;
use std::f64::consts::SQRT_2;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::function::erf::erf;
use tracing::debug;

use crate::config::{CostConfig, EstimatorConfig, RankerConfig};
use crate::cost::{CostModelRegistry, Interaction};
use crate::embedder::HashingEmbedder;
use crate::estimator::{LabelToken, UncertaintyEstimator};
use crate::ranker::{CalLogRanker, RankedTaskEntry, Task};

use super::agents::AnnotatorKind;

const SIM_ANNOTATOR: &str = "sim";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    CalLog,
    EntropyOnly,
    ColdStartOnly,
    Random,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::CalLog,
        Strategy::EntropyOnly,
        Strategy::ColdStartOnly,
        Strategy::Random,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::CalLog => "cal_log",
            Strategy::EntropyOnly => "entropy_only",
            Strategy::ColdStartOnly => "cold_start_only",
            Strategy::Random => "random",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub annotator: AnnotatorKind,
    pub rounds: usize,
    pub batch_size: usize,
    pub pool_size: usize,
    pub holdout_size: usize,
    pub num_labels: usize,
    pub embed_dim: usize,
    /// Rounds between annotator breaks; 0 disables breaks.
    pub break_every: usize,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            annotator: AnnotatorKind::Honest,
            rounds: 10,
            batch_size: 5,
            pool_size: 200,
            holdout_size: 80,
            num_labels: 4,
            embed_dim: 128,
            break_every: 5,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelledText {
    pub text: String,
    pub label: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyComparison {
    pub baseline: Strategy,
    pub cohens_d: f64,
    pub mann_whitney_u: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyResult {
    pub strategy: Strategy,
    pub total_cost_seconds: f64,
    pub tasks_annotated: usize,
    pub accuracy: f64,
    /// Cumulative seconds after each round.
    pub cost_trajectory: Vec<f64>,
    pub per_task_seconds: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vs_random: Option<StrategyComparison>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub config: SimulationConfig,
    pub results: Vec<StrategyResult>,
}

// =============================================================================
// Public API
// =============================================================================

pub fn run_simulation(cfg: &SimulationConfig) -> SimulationReport {
    let mut results: Vec<StrategyResult> = Strategy::ALL.iter().map(|&s| run_strategy(cfg, s)).collect();

    let baseline = results
        .iter()
        .find(|r| r.strategy == Strategy::Random)
        .map(|r| r.per_task_seconds.clone());
    if let Some(base) = baseline {
        for r in results.iter_mut().filter(|r| r.strategy != Strategy::Random) {
            let (u, p) = mann_whitney_u(&r.per_task_seconds, &base);
            r.vs_random = Some(StrategyComparison {
                baseline: Strategy::Random,
                cohens_d: cohens_d(&r.per_task_seconds, &base),
                mann_whitney_u: u,
                p_value: p,
            });
        }
    }

    SimulationReport {
        config: cfg.clone(),
        results,
    }
}

pub fn run_strategy(cfg: &SimulationConfig, strategy: Strategy) -> StrategyResult {
    let embedder = HashingEmbedder::new(cfg.embed_dim);
    let pool = synthetic_corpus(cfg.num_labels, cfg.pool_size, cfg.seed);
    let holdout = synthetic_corpus(cfg.num_labels, cfg.holdout_size, cfg.seed.wrapping_add(1));

    let est_cfg = EstimatorConfig {
        num_labels: cfg.num_labels,
        rng_seed: cfg.seed,
        ..EstimatorConfig::default()
    };
    let mut estimator = UncertaintyEstimator::new(est_cfg);
    let mut registry = CostModelRegistry::new(CostConfig::default());
    let ranker = CalLogRanker::new(RankerConfig::default());
    let mut annotator = cfg.annotator.build();
    let mut rng = StdRng::seed_from_u64(cfg.seed);

    let embeddings: HashMap<String, Vec<f64>> = pool
        .iter()
        .enumerate()
        .map(|(i, item)| (i.to_string(), embedder.embed_one(&item.text)))
        .collect();
    let truth: HashMap<String, &LabelledText> =
        pool.iter().enumerate().map(|(i, item)| (i.to_string(), item)).collect();
    let mut remaining: Vec<Task> = pool
        .iter()
        .enumerate()
        .map(|(i, item)| Task::new(i.to_string(), item.text.clone()))
        .collect();

    let mut total = 0.0;
    let mut trajectory = Vec::with_capacity(cfg.rounds);
    let mut per_task = Vec::new();

    for round in 0..cfg.rounds {
        if remaining.is_empty() {
            break;
        }
        let picked = select_batch(
            strategy,
            &ranker,
            &estimator,
            &registry,
            &remaining,
            &embeddings,
            cfg.batch_size,
            &mut rng,
        );

        let mut interactions = Vec::with_capacity(picked.len());
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for id in &picked {
            let (Some(item), Some(x)) = (truth.get(id), embeddings.get(id)) else {
                continue;
            };
            let decision = annotator.decide(&item.text, item.label, cfg.num_labels, &mut rng);
            let seconds = decision.elapsed_ms / 1000.0;
            total += seconds;
            per_task.push(seconds);
            interactions.push(Interaction {
                length: CalLogRanker::word_count(&item.text),
                elapsed_ms: decision.elapsed_ms,
            });
            if !decision.ambiguous {
                xs.push(x.clone());
                ys.push(LabelToken::Index(decision.label));
            }
        }

        registry.record_update(SIM_ANNOTATOR, &interactions);
        estimator.partial_update(&xs, &ys);
        remaining.retain(|t| !picked.contains(&t.id));
        trajectory.push(total);

        if cfg.break_every > 0 && (round + 1) % cfg.break_every == 0 {
            annotator.take_break();
        }
        debug!(strategy = strategy.as_str(), round, total, "simulation round complete");
    }

    let accuracy = holdout_accuracy(&estimator, &embedder, &holdout);
    StrategyResult {
        strategy,
        total_cost_seconds: total,
        tasks_annotated: per_task.len(),
        accuracy,
        cost_trajectory: trajectory,
        per_task_seconds: per_task,
        vs_random: None,
    }
}

/// Deterministic topic corpus: each text mixes words from its class
/// vocabulary with shared filler, at lengths between 5 and 60 words.
pub fn synthetic_corpus(num_labels: usize, n: usize, seed: u64) -> Vec<LabelledText> {
    let mut rng = StdRng::seed_from_u64(seed);
    let num_labels = num_labels.max(1);
    let vocabularies: Vec<Vec<String>> = (0..num_labels).map(class_vocabulary).collect();

    (0..n)
        .map(|_| {
            let label = rng.gen_range(0..num_labels);
            let len = rng.gen_range(5..=60);
            let words: Vec<&str> = (0..len)
                .map(|_| {
                    if rng.gen::<f64>() < 0.55 {
                        let vocab = &vocabularies[label];
                        vocab[rng.gen_range(0..vocab.len())].as_str()
                    } else {
                        FILLER[rng.gen_range(0..FILLER.len())]
                    }
                })
                .collect();
            LabelledText {
                text: words.join(" "),
                label,
            }
        })
        .collect()
}

/// Effect size of `a` relative to `b` using the pooled standard deviation.
pub fn cohens_d(a: &[f64], b: &[f64]) -> f64 {
    if a.len() < 2 || b.len() < 2 {
        return 0.0;
    }
    let (ma, va) = mean_var(a);
    let (mb, vb) = mean_var(b);
    let na = a.len() as f64;
    let nb = b.len() as f64;
    let pooled = (((na - 1.0) * va + (nb - 1.0) * vb) / (na + nb - 2.0)).sqrt();
    if pooled <= f64::EPSILON {
        0.0
    } else {
        (ma - mb) / pooled
    }
}

/// Mann–Whitney U for `a` with a two-sided p-value from the normal
/// approximation. Ties get average ranks.
pub fn mann_whitney_u(a: &[f64], b: &[f64]) -> (f64, f64) {
    if a.is_empty() || b.is_empty() {
        return (0.0, 1.0);
    }
    let mut all: Vec<(f64, bool)> = a
        .iter()
        .map(|&v| (v, true))
        .chain(b.iter().map(|&v| (v, false)))
        .collect();
    all.sort_by(|x, y| x.0.partial_cmp(&y.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut rank_sum_a = 0.0;
    let mut i = 0;
    while i < all.len() {
        let mut j = i + 1;
        while j < all.len() && all[j].0 == all[i].0 {
            j += 1;
        }
        // 1-based ranks i+1..=j share their mean.
        let avg_rank = (i + 1 + j) as f64 / 2.0;
        rank_sum_a += avg_rank * all[i..j].iter().filter(|(_, in_a)| *in_a).count() as f64;
        i = j;
    }

    let n1 = a.len() as f64;
    let n2 = b.len() as f64;
    let u = rank_sum_a - n1 * (n1 + 1.0) / 2.0;
    let mu = n1 * n2 / 2.0;
    let sigma = (n1 * n2 * (n1 + n2 + 1.0) / 12.0).sqrt();
    if sigma <= 0.0 {
        return (u, 1.0);
    }
    let z = (u - mu) / sigma;
    let p = 2.0 * (1.0 - normal_cdf(z.abs()));
    (u, p.clamp(0.0, 1.0))
}

// =============================================================================
// Internals
// =============================================================================

#[allow(clippy::too_many_arguments)]
fn select_batch(
    strategy: Strategy,
    ranker: &CalLogRanker,
    estimator: &UncertaintyEstimator,
    registry: &CostModelRegistry,
    remaining: &[Task],
    embeddings: &HashMap<String, Vec<f64>>,
    batch_size: usize,
    rng: &mut StdRng,
) -> Vec<String> {
    if strategy == Strategy::Random {
        let mut ids: Vec<String> = remaining.iter().map(|t| t.id.clone()).collect();
        ids.shuffle(rng);
        ids.truncate(batch_size);
        return ids;
    }

    let params = registry
        .params_for(SIM_ANNOTATOR)
        .unwrap_or_else(|| registry.global_params());
    let cold = |tasks: &[Task]| ranker.rank_cold_start(tasks, params, estimator.num_labels());

    let ranked: Vec<RankedTaskEntry> = if strategy == Strategy::ColdStartOnly || !estimator.is_fitted() {
        cold(remaining)
    } else {
        let xs: Vec<Vec<f64>> = remaining
            .iter()
            .map(|t| embeddings.get(&t.id).cloned().unwrap_or_default())
            .collect();
        let probs = estimator
            .predict_proba(&xs)
            .unwrap_or_else(|_| vec![estimator.uniform(); xs.len()]);
        let out = match strategy {
            Strategy::EntropyOnly => ranker.rank_entropy_only(remaining, &probs, params),
            _ => ranker.rank_cal_log(remaining, &probs, params, None),
        };
        out.unwrap_or_else(|_| cold(remaining))
    };

    let mut ids: Vec<String> = ranked.into_iter().take(batch_size).map(|e| e.id).collect();
    // Confident models can exclude everything; top up in pool order.
    for t in remaining {
        if ids.len() >= batch_size {
            break;
        }
        if !ids.contains(&t.id) {
            ids.push(t.id.clone());
        }
    }
    ids
}

fn holdout_accuracy(estimator: &UncertaintyEstimator, embedder: &HashingEmbedder, holdout: &[LabelledText]) -> f64 {
    if holdout.is_empty() {
        return 0.0;
    }
    let xs: Vec<Vec<f64>> = holdout.iter().map(|h| embedder.embed_one(&h.text)).collect();
    match estimator.predict(&xs) {
        Ok(pred) => {
            let hits = pred.iter().zip(holdout).filter(|(p, h)| **p == h.label).count();
            hits as f64 / holdout.len() as f64
        }
        Err(_) => 0.0,
    }
}

fn mean_var(v: &[f64]) -> (f64, f64) {
    let n = v.len() as f64;
    let mean = v.iter().sum::<f64>() / n;
    let var = v.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0).max(1.0);
    (mean, var)
}

fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / SQRT_2))
}

fn class_vocabulary(class: usize) -> Vec<String> {
    match TOPICS.get(class) {
        Some(words) => words.iter().map(|w| w.to_string()).collect(),
        None => (0..12).map(|j| format!("topic{class}term{j}")).collect(),
    }
}

const TOPICS: [&[&str]; 4] = [
    &[
        "election", "minister", "treaty", "border", "summit", "embassy", "parliament", "refugees",
        "ceasefire", "diplomat", "sanctions", "capital",
    ],
    &[
        "match", "goal", "season", "coach", "league", "playoff", "striker", "tournament", "injury",
        "championship", "stadium", "score",
    ],
    &[
        "shares", "profit", "merger", "earnings", "investors", "quarter", "revenue", "market",
        "stock", "acquisition", "dividend", "retail",
    ],
    &[
        "software", "research", "processor", "genome", "satellite", "network", "algorithm",
        "quantum", "laboratory", "browser", "robotics", "telescope",
    ],
];

const FILLER: &[&str] = &[
    "the", "a", "of", "and", "to", "in", "on", "with", "after", "new", "report", "said",
    "today", "week", "officials", "plans", "early", "latest",
];
