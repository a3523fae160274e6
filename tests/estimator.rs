use cal_log_harness::config::EstimatorConfig;
use cal_log_harness::estimator::{LabelToken, PredictionError, TrainOutcome, UncertaintyEstimator, UpdateOutcome};
use cal_log_harness::HashingEmbedder;
use tempfile::tempdir;

const CLASS_TEXTS: [&str; 4] = [
    "election minister treaty parliament summit embassy",
    "match goal season coach league striker",
    "shares profit merger earnings investors dividend",
    "software processor genome satellite algorithm quantum",
];

fn embedder() -> HashingEmbedder {
    HashingEmbedder::new(64)
}

/// Five short texts per class, each a rotation of the class vocabulary.
fn corpus() -> (Vec<String>, Vec<usize>) {
    let mut texts = Vec::new();
    let mut labels = Vec::new();
    for (label, base) in CLASS_TEXTS.iter().enumerate() {
        let words: Vec<&str> = base.split_whitespace().collect();
        for shift in 0..5 {
            let rotated: Vec<&str> = words.iter().cycle().skip(shift).take(4).copied().collect();
            texts.push(rotated.join(" "));
            labels.push(label);
        }
    }
    (texts, labels)
}

fn assert_distribution(p: &[f64], width: usize) {
    assert_eq!(p.len(), width);
    assert!(p.iter().all(|v| *v >= 0.0));
    let sum: f64 = p.iter().sum();
    assert!((sum - 1.0).abs() < 1e-6, "sum was {sum}");
}

#[test]
fn unfitted_estimator_predicts_uniform() {
    let est = UncertaintyEstimator::new(EstimatorConfig::default());
    let xs = embedder().embed_batch(&["anything at all".to_string(), "".to_string()]);
    let probs = est.predict_proba(&xs).unwrap();
    for p in probs {
        assert_eq!(p, vec![0.25; 4]);
    }
}

#[test]
fn training_yields_valid_distributions_and_learns() {
    let (texts, labels) = corpus();
    let xs = embedder().embed_batch(&texts);
    let tokens: Vec<LabelToken> = labels.iter().map(|&l| LabelToken::Index(l)).collect();

    let mut est = UncertaintyEstimator::new(EstimatorConfig::default());
    let outcome = est.train(&xs, &tokens, 10);
    match outcome {
        TrainOutcome::Trained { num_samples, epochs, accuracy } => {
            assert_eq!(num_samples, 20);
            assert_eq!(epochs, 10);
            assert!((0.0..=1.0).contains(&accuracy));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(est.is_fitted());
    assert_eq!(est.classes().to_vec(), vec![0, 1, 2, 3]);

    let probs = est.predict_proba(&xs).unwrap();
    for (p, &label) in probs.iter().zip(&labels) {
        assert_distribution(p, 4);
        assert!(p[label] > 0.25, "true class should beat uniform: {p:?}");
    }
}

#[test]
fn first_partial_update_covers_the_whole_schema() {
    let xs = embedder().embed_batch(&[CLASS_TEXTS[0].to_string(), CLASS_TEXTS[1].to_string()]);
    let mut est = UncertaintyEstimator::new(EstimatorConfig::default());
    let out = est.partial_update(&xs, &[LabelToken::Index(0), LabelToken::Index(1)]);
    assert_eq!(
        out,
        UpdateOutcome::Updated {
            num_samples: 2,
            classes_widened: true
        }
    );
    assert_eq!(est.classes().to_vec(), vec![0, 1, 2, 3]);

    let p = &est.predict_proba(&xs).unwrap()[0];
    assert_distribution(p, 4);
    assert!(p.iter().all(|&v| v > 0.0), "unseen classes keep mass: {p:?}");

    // Later batches keep the learned weights and do not widen further.
    let x3 = embedder().embed_batch(&[CLASS_TEXTS[3].to_string()]);
    let out = est.partial_update(&x3, &[LabelToken::Index(3)]);
    assert!(matches!(out, UpdateOutcome::Updated { classes_widened: false, .. }));
    assert_eq!(est.classes().to_vec(), vec![0, 1, 2, 3]);
    let p = &est.predict_proba(&x3).unwrap()[0];
    assert_distribution(p, 4);
}

#[test]
fn single_label_first_update_still_yields_uncertainty() {
    let xs = embedder().embed_batch(&[CLASS_TEXTS[2].to_string()]);
    let mut est = UncertaintyEstimator::new(EstimatorConfig::default());
    est.partial_update(&xs, &[LabelToken::Index(2)]);
    assert!(est.is_fitted());

    let others = embedder().embed_batch(&[CLASS_TEXTS[0].to_string(), CLASS_TEXTS[3].to_string()]);
    for p in est.predict_proba(&others).unwrap() {
        assert_distribution(&p, 4);
        assert!(p.iter().filter(|&&v| v > 0.0).count() > 1, "collapsed to one class: {p:?}");
    }
}

#[test]
fn named_labels_are_encoded_once_and_extended() {
    let texts = vec![CLASS_TEXTS[2].to_string(), CLASS_TEXTS[1].to_string(), CLASS_TEXTS[0].to_string()];
    let xs = embedder().embed_batch(&texts);
    let labels: Vec<LabelToken> = ["World", "Sports", "Business"].iter().map(|s| (*s).into()).collect();

    let mut est = UncertaintyEstimator::new(EstimatorConfig::default());
    est.train(&xs, &labels, 2);
    let enc = est.label_encoder();
    assert_eq!(enc.get("Business"), Some(0));
    assert_eq!(enc.get("Sports"), Some(1));
    assert_eq!(enc.get("World"), Some(2));
    let version = enc.version();

    let x4 = embedder().embed_batch(&[CLASS_TEXTS[3].to_string()]);
    est.partial_update(&x4, &["Sci/Tech".into()]);
    assert_eq!(est.label_encoder().get("Sci/Tech"), Some(3));
    assert_eq!(est.label_encoder().get("Business"), Some(0));
    assert_eq!(est.label_encoder().version(), version + 1);
}

#[test]
fn labels_outside_schema_are_skipped() {
    let xs = embedder().embed_batch(&[CLASS_TEXTS[0].to_string(), CLASS_TEXTS[1].to_string()]);
    let mut est = UncertaintyEstimator::new(EstimatorConfig::default());
    let out = est.partial_update(&xs, &[LabelToken::Index(9), LabelToken::Index(1)]);
    assert_eq!(
        out,
        UpdateOutcome::Updated {
            num_samples: 1,
            classes_widened: true
        }
    );
    assert_eq!(est.classes().to_vec(), vec![0, 1, 2, 3]);
}

#[test]
fn wrong_dimension_is_a_prediction_error() {
    let (texts, labels) = corpus();
    let xs = embedder().embed_batch(&texts);
    let tokens: Vec<LabelToken> = labels.iter().map(|&l| l.into()).collect();
    let mut est = UncertaintyEstimator::new(EstimatorConfig::default());
    est.train(&xs, &tokens, 1);

    let err = est.predict_proba(&[vec![1.0, 0.0]]).unwrap_err();
    assert_eq!(err, PredictionError::DimensionMismatch { expected: 64, got: 2 });
}

#[test]
fn artifact_round_trip_preserves_predictions() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");

    let unfitted = UncertaintyEstimator::new(EstimatorConfig::default());
    assert!(!unfitted.save_artifact(&path).unwrap());
    assert!(!path.exists());

    let (texts, labels) = corpus();
    let xs = embedder().embed_batch(&texts);
    let tokens: Vec<LabelToken> = labels.iter().map(|&l| l.into()).collect();
    let mut est = UncertaintyEstimator::new(EstimatorConfig::default());
    est.train(&xs, &tokens, 3);
    assert!(est.save_artifact(&path).unwrap());

    let loaded = UncertaintyEstimator::load_artifact(&path, EstimatorConfig::default()).unwrap();
    assert!(loaded.is_fitted());
    assert_eq!(loaded.classes(), est.classes());
    let before = est.predict_proba(&xs).unwrap();
    let after = loaded.predict_proba(&xs).unwrap();
    for (a, b) in before.iter().zip(&after) {
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-9);
        }
    }
}

#[test]
fn artifact_with_other_label_width_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    let (texts, labels) = corpus();
    let xs = embedder().embed_batch(&texts);
    let tokens: Vec<LabelToken> = labels.iter().map(|&l| l.into()).collect();
    let mut est = UncertaintyEstimator::new(EstimatorConfig::default());
    est.train(&xs, &tokens, 1);
    est.save_artifact(&path).unwrap();

    let cfg = EstimatorConfig {
        num_labels: 5,
        ..EstimatorConfig::default()
    };
    assert!(UncertaintyEstimator::load_artifact(&path, cfg).is_err());
}
