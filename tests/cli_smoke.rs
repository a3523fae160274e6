use std::path::Path;
use std::process::Command;

use cal_log_harness::{FeedbackResult, RankResponse, RankingMode, SessionState};
use tempfile::tempdir;

#[derive(Debug, serde::Deserialize)]
struct StrategyRow {
    strategy: String,
    tasks_annotated: usize,
    total_cost_seconds: f64,
}

fn cal_log(args: &[&str], extra: &[&Path]) -> std::process::Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_cal-log"));
    cmd.args(args);
    for p in extra {
        cmd.arg(p);
    }
    let out = cmd.output().unwrap();
    assert!(
        out.status.success(),
        "cal-log {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    out
}

#[test]
fn simulate_writes_one_line_per_strategy() {
    let dir = tempdir().unwrap();
    let out_path = dir.path().join("sim.jsonl");

    let status = Command::new(env!("CARGO_BIN_EXE_cal-log"))
        .args(["simulate", "--rounds", "2", "--batch-size", "2", "--seed", "3"])
        .arg("--out")
        .arg(&out_path)
        .status()
        .unwrap();
    assert!(status.success());

    let raw = std::fs::read_to_string(&out_path).unwrap();
    let rows: Vec<StrategyRow> = raw.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    let names: Vec<&str> = rows.iter().map(|r| r.strategy.as_str()).collect();
    assert_eq!(names, vec!["cal_log", "entropy_only", "cold_start_only", "random"]);
    assert!(rows.iter().all(|r| r.tasks_annotated == 4 && r.total_cost_seconds > 0.0));
}

#[test]
fn rank_feedback_and_state_share_one_session() {
    let dir = tempdir().unwrap();
    let state = dir.path().join("state.json");
    let request = dir.path().join("request.json");
    let ranked = dir.path().join("ranked.json");
    let report = dir.path().join("report.md");
    let items = dir.path().join("items.json");
    let result = dir.path().join("feedback.json");

    std::fs::write(
        &request,
        r#"{"mode": "cold_start", "tasks": [
            {"id": "long", "text": "a considerably longer piece of text that takes a while to read"},
            {"taskId": "short", "text": "brief note"}
        ]}"#,
    )
    .unwrap();
    cal_log(
        &["rank", "--request"],
        &[&request, Path::new("--out"), &ranked, Path::new("--state"), &state, Path::new("--report"), &report],
    );
    let resp: RankResponse = serde_json::from_str(&std::fs::read_to_string(&ranked).unwrap()).unwrap();
    assert_eq!(resp.mode, RankingMode::ColdStart);
    assert_eq!(resp.model_version, "CAL-Log-v0");
    assert_eq!(resp.entries[0].id, "short");
    let md = std::fs::read_to_string(&report).unwrap();
    assert!(md.starts_with("# Ranking Report"));

    std::fs::write(
        &items,
        r#"[{"text": "brief note", "label": 1, "elapsed_seconds": 4.5},
            {"text": "another brief note", "lead_time": 900}]"#,
    )
    .unwrap();
    cal_log(
        &["feedback", "--annotator", "ann-1", "--items"],
        &[&items, Path::new("--out"), &result, Path::new("--state"), &state],
    );
    let fb: FeedbackResult = serde_json::from_str(&std::fs::read_to_string(&result).unwrap()).unwrap();
    assert_eq!(fb.train_step, 1);
    assert_eq!(fb.interactions_accepted, 1);
    assert_eq!(fb.interactions_rejected, 1);
    assert_eq!(fb.labels_used, 1);

    let out = cal_log(&["state", "--state"], &[&state]);
    let session: SessionState = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(session.train_step, 1);
    assert!(session.models.contains_key("ann-1"));
}

#[test]
fn pretrained_model_enables_cal_log_ranking() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("train.jsonl");
    let model = dir.path().join("model.json");
    let state = dir.path().join("state.json");
    let request = dir.path().join("request.json");
    let ranked = dir.path().join("ranked.json");

    let mut lines = String::new();
    let topics = [
        ("World", "election minister treaty parliament summit"),
        ("Sports", "match goal season coach league"),
        ("Business", "shares profit merger earnings investors"),
        ("Sci/Tech", "software processor genome satellite algorithm"),
    ];
    for (label, text) in topics {
        for i in 0..3 {
            lines.push_str(&format!("{{\"text\": \"{text} item {i}\", \"label\": \"{label}\"}}\n"));
        }
    }
    std::fs::write(&data, lines).unwrap();
    cal_log(&["pretrain", "--epochs", "3", "--data"], &[&data, Path::new("--out"), &model]);
    assert!(model.exists());

    std::fs::write(
        &request,
        r#"{"tasks": [
            {"id": "a", "text": "summit about the league season"},
            {"id": "b", "text": "profit from a new processor"}
        ]}"#,
    )
    .unwrap();
    cal_log(
        &["rank", "--request"],
        &[&request, Path::new("--out"), &ranked, Path::new("--state"), &state, Path::new("--model"), &model],
    );
    let resp: RankResponse = serde_json::from_str(&std::fs::read_to_string(&ranked).unwrap()).unwrap();
    assert_eq!(resp.requested_mode, RankingMode::CalLog);
    assert_eq!(resp.mode, RankingMode::CalLog);
    assert_eq!(resp.entries.len(), 2);
}
