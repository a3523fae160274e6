//! Owner of every annotator's cost model, plus the unweighted global average
//! used before an annotator is identified.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::CostConfig;

use super::model::{AdaptiveCostModel, CostParams, CostUpdateSummary, Interaction};

/// Id used for unattributed feedback.
pub const DEFAULT_ANNOTATOR: &str = "default";

/// Map a blank id onto [`DEFAULT_ANNOTATOR`].
pub fn normalize_annotator_id(id: &str) -> &str {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        DEFAULT_ANNOTATOR
    } else {
        trimmed
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryUpdate {
    pub annotator_id: String,
    pub created: bool,
    pub previous: CostParams,
    pub params: CostParams,
    pub global: CostParams,
    pub summary: CostUpdateSummary,
}

#[derive(Debug, Clone)]
pub struct CostModelRegistry {
    cfg: CostConfig,
    models: BTreeMap<String, AdaptiveCostModel>,
    /// Annotators with at least one accepted observation, this process or a
    /// previous one.
    known: BTreeSet<String>,
    global: CostParams,
}

impl CostModelRegistry {
    pub fn new(cfg: CostConfig) -> Self {
        Self {
            global: default_params(&cfg),
            cfg,
            models: BTreeMap::new(),
            known: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn contains(&self, annotator_id: &str) -> bool {
        self.models.contains_key(annotator_id)
    }

    pub fn get(&self, annotator_id: &str) -> Option<&AdaptiveCostModel> {
        self.models.get(annotator_id)
    }

    /// Fetch the annotator's model, creating it with default parameters on
    /// first use.
    pub fn get_or_create(&mut self, annotator_id: &str) -> &mut AdaptiveCostModel {
        if !self.models.contains_key(annotator_id) {
            info!(annotator = annotator_id, "new annotator detected");
            self.models
                .insert(annotator_id.to_string(), AdaptiveCostModel::new(&self.cfg));
            self.recompute_global();
        }
        // Inserted above when absent.
        self.models
            .entry(annotator_id.to_string())
            .or_insert_with(|| AdaptiveCostModel::new(&self.cfg))
    }

    pub fn record_update(&mut self, annotator_id: &str, interactions: &[Interaction]) -> RegistryUpdate {
        let created = !self.models.contains_key(annotator_id);
        let model = self.get_or_create(annotator_id);
        let previous = model.params();
        let summary = model.update(interactions);
        let params = model.params();

        if summary.accepted > 0 {
            self.known.insert(annotator_id.to_string());
        }
        self.recompute_global();

        info!(
            annotator = annotator_id,
            old_alpha = previous.alpha,
            old_beta = previous.beta,
            alpha = params.alpha,
            beta = params.beta,
            accepted = summary.accepted,
            rejected = summary.rejected,
            "cost model updated"
        );

        RegistryUpdate {
            annotator_id: annotator_id.to_string(),
            created,
            previous,
            params,
            global: self.global,
            summary,
        }
    }

    /// Mean alpha and beta over all registered annotators; defaults when
    /// none are registered.
    pub fn global_params(&self) -> CostParams {
        self.global
    }

    pub fn params_for(&self, annotator_id: &str) -> Option<CostParams> {
        self.models.get(annotator_id).map(|m| m.params())
    }

    pub fn has_observations(&self, annotator_id: &str) -> bool {
        self.known.contains(annotator_id)
    }

    pub fn snapshot(&self) -> BTreeMap<String, CostParams> {
        self.models
            .iter()
            .map(|(id, m)| (id.clone(), m.params()))
            .collect()
    }

    /// Replace all models with restored parameters. Restored annotators count
    /// as known; their histories start empty. Non-finite parameters fall back
    /// to the defaults and everything is floored at `param_floor`.
    pub fn restore(&mut self, snapshot: &BTreeMap<String, CostParams>) {
        self.models = snapshot
            .iter()
            .map(|(id, p)| {
                let params = self.sanitize(id, *p);
                (id.clone(), AdaptiveCostModel::with_params(&self.cfg, params))
            })
            .collect();
        self.known = snapshot.keys().cloned().collect();
        self.recompute_global();
    }

    fn sanitize(&self, annotator_id: &str, p: CostParams) -> CostParams {
        let defaults = default_params(&self.cfg);
        let floor = self.cfg.param_floor;
        let alpha = if p.alpha.is_finite() { p.alpha } else { defaults.alpha };
        let beta = if p.beta.is_finite() { p.beta } else { defaults.beta };
        let fixed = CostParams::new(alpha.max(floor), beta.max(floor));
        if fixed != p {
            warn!(
                annotator = annotator_id,
                alpha = p.alpha,
                beta = p.beta,
                restored_alpha = fixed.alpha,
                restored_beta = fixed.beta,
                "restored cost parameters out of range; clamped"
            );
        }
        fixed
    }

    fn recompute_global(&mut self) {
        if self.models.is_empty() {
            self.global = default_params(&self.cfg);
            return;
        }
        let n = self.models.len() as f64;
        let (sa, sb) = self
            .models
            .values()
            .map(|m| m.params())
            .fold((0.0, 0.0), |(a, b), p| (a + p.alpha, b + p.beta));
        self.global = CostParams::new(sa / n, sb / n);
    }
}

fn default_params(cfg: &CostConfig) -> CostParams {
    CostParams::new(cfg.default_alpha, cfg.default_beta)
}
