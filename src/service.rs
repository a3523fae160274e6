//! The ranking service: one explicitly owned object holding the estimator,
//! the cost model registry, and the session store.
//!
//! Locking:
//! - estimator and registry each sit behind their own `RwLock`; ranking only
//!   takes read guards.
//! - feedback calls are serialised by an async gate so the step counter,
//!   registry update, and session save happen in request order.
//! - no std lock guard is held across an `.await`.
//!
//! Every public ranking and feedback call returns a well-formed result.
//! Degraded inputs (embedding failure, prediction failure, malformed
//! penalties) lower ranking quality and are logged, never surfaced as errors.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{AnnotatorCostPolicy, ConfigError, EngineConfig};
use crate::cost::{normalize_annotator_id, CostModelRegistry, CostParams};
use crate::embedder::{EmbedError, Embedder};
use crate::estimator::{ArtifactError, LabelToken, TrainOutcome, UncertaintyEstimator, UpdateOutcome};
use crate::feedback::{FeedbackBatch, FeedbackItem, FeedbackResult};
use crate::ranker::{
    model_version, CalLogRanker, CostParamsSource, CostParamsUsed, RankRequest, RankResponse,
    RankedTaskEntry, RankingMode, Task,
};
use crate::session::{SessionError, SessionState, SessionStore};
use crate::trace::{now_epoch_ms, TraceEvent, TraceSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShutdownSummary {
    pub session_saved: bool,
    pub estimator_saved: bool,
}

pub struct CalLogService<E: Embedder> {
    cfg: EngineConfig,
    embedder: E,
    ranker: CalLogRanker,
    estimator: RwLock<UncertaintyEstimator>,
    registry: RwLock<CostModelRegistry>,
    train_step: AtomicU64,
    feedback_gate: tokio::sync::Mutex<()>,
    store: SessionStore,
    trace: Option<Arc<dyn TraceSink>>,
}

impl<E: Embedder> CalLogService<E> {
    /// Validate the config and restore whatever prior state exists. Missing
    /// or corrupt session and model files are logged and ignored.
    pub fn open(cfg: EngineConfig, embedder: E) -> Result<Self, ConfigError> {
        cfg.validate()?;

        let store = SessionStore::new(&cfg.state_path);
        let session = store.load_or_default();
        let mut registry = CostModelRegistry::new(cfg.cost);
        registry.restore(&session.models);

        let estimator = match &cfg.model_path {
            Some(path) if path.exists() => {
                match UncertaintyEstimator::load_artifact(path, cfg.estimator.clone()) {
                    Ok(est) => est,
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "failed to load estimator artifact; starting unfitted");
                        UncertaintyEstimator::new(cfg.estimator.clone())
                    }
                }
            }
            Some(path) => {
                info!(path = %path.display(), "no estimator artifact found; starting unfitted");
                UncertaintyEstimator::new(cfg.estimator.clone())
            }
            None => UncertaintyEstimator::new(cfg.estimator.clone()),
        };

        info!(
            train_step = session.train_step,
            annotators = registry.len(),
            fitted = estimator.is_fitted(),
            "ranking service ready"
        );

        Ok(Self {
            ranker: CalLogRanker::new(cfg.ranker),
            estimator: RwLock::new(estimator),
            registry: RwLock::new(registry),
            train_step: AtomicU64::new(session.train_step),
            feedback_gate: tokio::sync::Mutex::new(()),
            store,
            trace: None,
            embedder,
            cfg,
        })
    }

    /// Attach an audit trail.
    pub fn with_trace(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(sink);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    pub fn train_step(&self) -> u64 {
        self.train_step.load(Ordering::SeqCst)
    }

    pub fn is_fitted(&self) -> bool {
        self.read_estimator().is_fitted()
    }

    pub fn global_params(&self) -> CostParams {
        self.read_registry().global_params()
    }

    pub fn annotator_params(&self, annotator_id: &str) -> Option<CostParams> {
        self.read_registry().params_for(normalize_annotator_id(annotator_id))
    }

    pub fn session_state(&self) -> SessionState {
        SessionState {
            train_step: self.train_step(),
            models: self.read_registry().snapshot(),
        }
    }

    // -----------------------------------------------------------------
    //  Ranking
    // -----------------------------------------------------------------

    pub async fn rank_tasks(&self, req: &RankRequest) -> RankResponse {
        let train_step = self.train_step();
        let cost = self.cost_params_for(req.annotator_id.as_deref());
        let params = cost.params();

        let (mode, fallback_reason, entries) = if req.tasks.is_empty() {
            (req.mode, None, Vec::new())
        } else {
            match req.mode {
                RankingMode::ColdStart => (RankingMode::ColdStart, None, self.cold_start(&req.tasks, params)),
                mode => match self.rank_with_model(mode, req, params).await {
                    Ok(entries) => (mode, None, entries),
                    Err(reason) => {
                        warn!(requested = mode.as_str(), reason = %reason, "falling back to cold-start ranking");
                        (RankingMode::ColdStart, Some(reason), self.cold_start(&req.tasks, params))
                    }
                },
            }
        };

        debug!(
            mode = mode.as_str(),
            tasks = req.tasks.len(),
            ranked = entries.len(),
            train_step,
            "ranking complete"
        );

        self.emit(TraceEvent::Rank {
            timestamp_ms: now_epoch_ms(),
            train_step,
            mode,
            tasks_in: req.tasks.len(),
            tasks_out: entries.len(),
            top_id: entries.first().map(|e| e.id.clone()),
            alpha: params.alpha,
            beta: params.beta,
        });

        RankResponse {
            model_version: model_version(train_step),
            train_step,
            mode,
            requested_mode: req.mode,
            fallback_reason,
            cost_params: cost,
            entries,
        }
    }

    /// Cold start while the estimator is unfitted, CAL-Log afterwards.
    pub async fn rank_auto(
        &self,
        tasks: Vec<Task>,
        penalties: Option<Vec<f64>>,
        annotator_id: Option<String>,
    ) -> RankResponse {
        let mode = if self.is_fitted() {
            RankingMode::CalLog
        } else {
            RankingMode::ColdStart
        };
        let req = RankRequest {
            tasks,
            mode,
            penalties,
            annotator_id,
        };
        self.rank_tasks(&req).await
    }

    fn cold_start(&self, tasks: &[Task], params: CostParams) -> Vec<RankedTaskEntry> {
        self.ranker
            .rank_cold_start(tasks, params, self.cfg.estimator.num_labels)
    }

    /// Entropy-based policies. `Err` carries the reason the caller should
    /// degrade to cold start.
    async fn rank_with_model(
        &self,
        mode: RankingMode,
        req: &RankRequest,
        params: CostParams,
    ) -> Result<Vec<RankedTaskEntry>, String> {
        let probabilities = self.probabilities(&req.tasks).await?;
        let ranked = match mode {
            RankingMode::EntropyOnly => self.ranker.rank_entropy_only(&req.tasks, &probabilities, params),
            _ => self
                .ranker
                .rank_cal_log(&req.tasks, &probabilities, params, req.penalties.as_deref()),
        };
        ranked.map_err(|e| e.to_string())
    }

    /// Embed and predict. Prediction failures become uniform rows; only an
    /// embedding failure is reported back.
    async fn probabilities(&self, tasks: &[Task]) -> Result<Vec<Vec<f64>>, String> {
        let texts: Vec<String> = tasks.iter().map(|t| t.text.clone()).collect();
        let embeddings = match self.embed_checked(&texts).await {
            Ok(e) => e,
            Err(err) => {
                warn!(error = %err, tasks = texts.len(), "embedding failed during ranking");
                return Err(format!("embedding failed: {err}"));
            }
        };

        let est = self.read_estimator();
        match est.predict_proba(&embeddings) {
            Ok(p) => Ok(p),
            Err(err) => {
                warn!(error = %err, "prediction failed; using uniform distributions");
                Ok(vec![est.uniform(); embeddings.len()])
            }
        }
    }

    fn cost_params_for(&self, annotator_id: Option<&str>) -> CostParamsUsed {
        let reg = self.read_registry();
        let global = reg.global_params();
        if self.cfg.annotator_cost_policy == AnnotatorCostPolicy::PerAnnotatorWhenKnown {
            if let Some(id) = annotator_id.map(normalize_annotator_id) {
                if reg.has_observations(id) {
                    if let Some(p) = reg.params_for(id) {
                        return CostParamsUsed {
                            alpha: p.alpha,
                            beta: p.beta,
                            source: CostParamsSource::Annotator,
                            annotator_id: Some(id.to_string()),
                        };
                    }
                }
            }
        }
        CostParamsUsed {
            alpha: global.alpha,
            beta: global.beta,
            source: CostParamsSource::Global,
            annotator_id: None,
        }
    }

    // -----------------------------------------------------------------
    //  Feedback and training
    // -----------------------------------------------------------------

    /// Apply one annotator's submissions: bump the step, refit their cost
    /// model, update the estimator on labelled items, then persist.
    pub async fn record_feedback(&self, annotator_id: &str, items: &[FeedbackItem]) -> FeedbackResult {
        let _gate = self.feedback_gate.lock().await;
        let annotator = normalize_annotator_id(annotator_id).to_string();
        let train_step = self.train_step.fetch_add(1, Ordering::SeqCst) + 1;
        let batch = FeedbackBatch::from_items(items);

        let (accepted, rejected) = if batch.interactions.is_empty() {
            warn!(annotator = %annotator, train_step, "no interaction logs in feedback; cost parameters not updated");
            (0, 0)
        } else {
            let update = self.write_registry().record_update(&annotator, &batch.interactions);
            (update.summary.accepted, update.summary.rejected)
        };

        let labels_used = self.update_estimator(&batch.texts, &batch.labels).await;

        if let Err(err) = self.save_session() {
            error!(path = %self.store.path().display(), error = %err, "failed to save session state");
        }

        let (global, own) = {
            let reg = self.read_registry();
            (reg.global_params(), reg.params_for(&annotator))
        };
        let own = own.unwrap_or(global);

        self.emit(TraceEvent::Feedback {
            timestamp_ms: now_epoch_ms(),
            train_step,
            annotator_id: annotator.clone(),
            accepted,
            rejected,
            labels_used,
            alpha: global.alpha,
            beta: global.beta,
        });

        FeedbackResult {
            train_step,
            alpha: global.alpha,
            beta: global.beta,
            annotator_id: annotator,
            annotator_alpha: own.alpha,
            annotator_beta: own.beta,
            interactions_accepted: accepted,
            interactions_rejected: rejected,
            labels_used,
        }
    }

    async fn update_estimator(&self, texts: &[String], labels: &[LabelToken]) -> usize {
        if texts.is_empty() {
            return 0;
        }
        let embeddings = match self.embed_checked(texts).await {
            Ok(e) => e,
            Err(err) => {
                warn!(error = %err, samples = texts.len(), "embedding failed during feedback; estimator not updated");
                return 0;
            }
        };
        match self.write_estimator().partial_update(&embeddings, labels) {
            UpdateOutcome::Updated { num_samples, .. } => num_samples,
            UpdateOutcome::Empty => 0,
        }
    }

    /// Full multi-epoch training on a labelled corpus. `epochs` defaults to
    /// the configured value.
    pub async fn train(
        &self,
        texts: &[String],
        labels: &[LabelToken],
        epochs: Option<usize>,
    ) -> Result<TrainOutcome, EmbedError> {
        let embeddings = self.embed_checked(texts).await?;
        let epochs = epochs.unwrap_or(self.cfg.estimator.default_epochs);
        Ok(self.write_estimator().train(&embeddings, labels, epochs))
    }

    // -----------------------------------------------------------------
    //  Persistence
    // -----------------------------------------------------------------

    pub fn save_session(&self) -> Result<(), SessionError> {
        self.store.save(&self.session_state())
    }

    /// Write the estimator artifact to the configured model path. `Ok(false)`
    /// when no path is configured or nothing is fitted.
    pub fn save_estimator(&self) -> Result<bool, ArtifactError> {
        match &self.cfg.model_path {
            Some(path) => self.save_estimator_to(path),
            None => Ok(false),
        }
    }

    pub fn save_estimator_to(&self, path: impl AsRef<Path>) -> Result<bool, ArtifactError> {
        self.read_estimator().save_artifact(path)
    }

    /// Flush session state and the estimator artifact.
    pub fn shutdown(&self) -> ShutdownSummary {
        let session_saved = match self.save_session() {
            Ok(()) => true,
            Err(err) => {
                error!(error = %err, "failed to flush session state on shutdown");
                false
            }
        };
        let estimator_saved = match self.save_estimator() {
            Ok(saved) => saved,
            Err(err) => {
                error!(error = %err, "failed to flush estimator artifact on shutdown");
                false
            }
        };
        info!(session_saved, estimator_saved, train_step = self.train_step(), "ranking service shut down");
        ShutdownSummary {
            session_saved,
            estimator_saved,
        }
    }

    // -----------------------------------------------------------------
    //  Internals
    // -----------------------------------------------------------------

    async fn embed_checked(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, EmbedError> {
        let out = self.embedder.embed(texts).await?;
        if out.len() != texts.len() {
            return Err(EmbedError::CountMismatch {
                expected: texts.len(),
                got: out.len(),
            });
        }
        Ok(out)
    }

    fn emit(&self, event: TraceEvent) {
        if let Some(sink) = &self.trace {
            if let Err(err) = sink.record(event) {
                warn!(error = %err, "failed to record trace event");
            }
        }
    }

    // A poisoned lock only means another request panicked mid-call; the
    // guarded state is still structurally valid.
    fn read_estimator(&self) -> RwLockReadGuard<'_, UncertaintyEstimator> {
        self.estimator.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_estimator(&self) -> RwLockWriteGuard<'_, UncertaintyEstimator> {
        self.estimator.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read_registry(&self) -> RwLockReadGuard<'_, CostModelRegistry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_registry(&self) -> RwLockWriteGuard<'_, CostModelRegistry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }
}
