use cal_log_harness::simulation::{
    mann_whitney_u, run_simulation, run_strategy, synthetic_corpus, AnnotatorKind, SimulationConfig, Strategy,
};

fn small() -> SimulationConfig {
    SimulationConfig {
        rounds: 4,
        batch_size: 3,
        pool_size: 40,
        holdout_size: 20,
        embed_dim: 32,
        ..SimulationConfig::default()
    }
}

#[test]
fn every_strategy_annotates_the_same_budget() {
    let report = run_simulation(&small());
    assert_eq!(report.results.len(), 4);

    for r in &report.results {
        assert_eq!(r.tasks_annotated, 12, "{}", r.strategy.as_str());
        assert_eq!(r.cost_trajectory.len(), 4);
        assert!(r.cost_trajectory.windows(2).all(|w| w[0] <= w[1]));
        let last = *r.cost_trajectory.last().unwrap();
        assert!((last - r.total_cost_seconds).abs() < 1e-9);
        assert!((0.0..=1.0).contains(&r.accuracy));

        match r.strategy {
            Strategy::Random => assert!(r.vs_random.is_none()),
            _ => {
                let cmp = r.vs_random.as_ref().unwrap();
                assert_eq!(cmp.baseline, Strategy::Random);
                assert!((0.0..=1.0).contains(&cmp.p_value));
            }
        }
    }
}

#[test]
fn runs_are_reproducible_for_a_seed() {
    let cfg = SimulationConfig {
        annotator: AnnotatorKind::Fatigued,
        ..small()
    };
    let a = run_strategy(&cfg, Strategy::CalLog);
    let b = run_strategy(&cfg, Strategy::CalLog);
    assert_eq!(a.per_task_seconds, b.per_task_seconds);
    assert_eq!(a.accuracy, b.accuracy);
}

#[test]
fn cold_start_only_picks_shortest_texts_first() {
    let cfg = SimulationConfig {
        rounds: 1,
        batch_size: 5,
        ..small()
    };
    let honest = run_strategy(&cfg, Strategy::ColdStartOnly);
    let random = run_strategy(&cfg, Strategy::Random);
    // Honest annotators take time proportional to length.
    assert!(honest.total_cost_seconds <= random.total_cost_seconds);
}

#[test]
fn corpus_respects_label_range_and_length() {
    let corpus = synthetic_corpus(3, 50, 9);
    assert_eq!(corpus.len(), 50);
    for item in &corpus {
        assert!(item.label < 3);
        let n = item.text.split_whitespace().count();
        assert!((5..=60).contains(&n));
    }
    assert_eq!(corpus, synthetic_corpus(3, 50, 9));
}

#[test]
fn mann_whitney_separates_shifted_samples() {
    let a: Vec<f64> = (0..20).map(|i| i as f64).collect();
    let b: Vec<f64> = (0..20).map(|i| i as f64 + 100.0).collect();
    let (u, p) = mann_whitney_u(&a, &b);
    assert_eq!(u, 0.0);
    assert!(p < 0.001);

    let (_, p_same) = mann_whitney_u(&a, &a);
    assert!(p_same > 0.9);
}
