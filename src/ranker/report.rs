//! Report generation for ranking calls.

use serde::Serialize;

use super::types::{CostParamsUsed, RankRequest, RankResponse, RankedTaskEntry, RankingMode};

#[derive(Debug, Clone, Serialize)]
pub struct RankReportOptions {
    pub top_n: usize,
    pub include_text: bool,
}

impl Default for RankReportOptions {
    fn default() -> Self {
        Self {
            top_n: 10,
            include_text: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RankReport {
    pub request_hash: String,
    pub summary: ReportSummary,
    pub top_entries: Vec<ReportEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub model_version: String,
    pub train_step: u64,
    pub requested_mode: RankingMode,
    pub mode: RankingMode,
    pub fallback_reason: Option<String>,
    pub cost_params: CostParamsUsed,
    pub tasks_in: usize,
    pub tasks_out: usize,
    pub excluded: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub rank: usize,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub score: f64,
    pub label_index: usize,
    pub confidence: f64,
    pub predicted_seconds: f64,
    pub entropy: f64,
    pub redundancy_penalty: f64,
    pub cal_log_score: f64,
}

pub fn build_report(req: &RankRequest, resp: &RankResponse, opts: &RankReportOptions) -> RankReport {
    let tasks_in = req.tasks.len();
    let tasks_out = resp.entries.len();
    RankReport {
        request_hash: hash_request(req),
        summary: ReportSummary {
            model_version: resp.model_version.clone(),
            train_step: resp.train_step,
            requested_mode: resp.requested_mode,
            mode: resp.mode,
            fallback_reason: resp.fallback_reason.clone(),
            cost_params: resp.cost_params.clone(),
            tasks_in,
            tasks_out,
            excluded: tasks_in.saturating_sub(tasks_out),
        },
        top_entries: resp
            .entries
            .iter()
            .take(opts.top_n)
            .enumerate()
            .map(|(i, e)| ReportEntry::from_entry(i + 1, e, opts.include_text))
            .collect(),
    }
}

impl ReportEntry {
    fn from_entry(rank: usize, e: &RankedTaskEntry, include_text: bool) -> Self {
        let proof = &e.transparency_report.math_proof;
        Self {
            rank,
            id: e.id.clone(),
            text: include_text.then(|| e.text.clone()),
            score: e.score,
            label_index: e.prediction.label_index,
            confidence: e.prediction.confidence,
            predicted_seconds: e.transparency_report.cost_analysis.predicted_seconds,
            entropy: proof.entropy,
            redundancy_penalty: proof.redundancy_penalty,
            cal_log_score: proof.cal_log_score,
        }
    }
}

pub fn render_report_markdown(report: &RankReport) -> String {
    let s = &report.summary;
    let mut out = String::new();
    out.push_str("# Ranking Report\n\n");
    out.push_str(&format!("- Request hash: `{}`\n", report.request_hash));
    out.push_str(&format!("- Model version: {}\n", s.model_version));
    out.push_str(&format!(
        "- Mode: {} (requested {})\n",
        s.mode.as_str(),
        s.requested_mode.as_str()
    ));
    if let Some(reason) = &s.fallback_reason {
        out.push_str(&format!("- Fallback: {}\n", reason));
    }
    out.push_str(&format!(
        "- Cost params: alpha {:.3}, beta {:.3} ({:?})\n",
        s.cost_params.alpha, s.cost_params.beta, s.cost_params.source
    ));
    out.push_str(&format!(
        "- Tasks in/out/excluded: {}/{}/{}\n",
        s.tasks_in, s.tasks_out, s.excluded
    ));

    out.push_str("\n## Top Tasks\n\n");
    out.push_str("| # | id | score | label | conf | seconds | entropy | penalty |\n");
    out.push_str("|---|----|-------|-------|------|---------|---------|---------|\n");
    for e in &report.top_entries {
        out.push_str(&format!(
            "| {} | {} | {:.4} | {} | {:.3} | {:.2} | {:.4} | {:.2} |\n",
            e.rank,
            e.id,
            e.score,
            e.label_index,
            e.confidence,
            e.predicted_seconds,
            e.entropy,
            e.redundancy_penalty
        ));
    }
    out
}

fn hash_request(req: &RankRequest) -> String {
    let bytes = serde_json::to_vec(req).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}
