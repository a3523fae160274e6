use cal_log_harness::cost::CostParams;
use cal_log_harness::{SessionState, SessionStore};
use tempfile::tempdir;

#[test]
fn missing_state_loads_as_none() {
    let dir = tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("state.json"));
    assert!(store.load().unwrap().is_none());
    assert_eq!(store.load_or_default(), SessionState::default());
}

#[test]
fn save_then_load_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("state.json");
    let store = SessionStore::new(&path);

    let mut state = SessionState {
        train_step: 7,
        ..SessionState::default()
    };
    state.models.insert("alice".into(), CostParams::new(2.5, 1.25));
    state.models.insert("default".into(), CostParams::new(5.0, 3.0));
    store.save(&state).unwrap();

    assert_eq!(store.load().unwrap(), Some(state.clone()));

    // Overwrite replaces rather than appends.
    state.train_step = 8;
    store.save(&state).unwrap();
    assert_eq!(store.load().unwrap().unwrap().train_step, 8);
}

#[test]
fn reads_the_plain_wire_format() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(
        &path,
        r#"{"step": 12, "models": {"bob": {"alpha": 3.0, "beta": 0.5}}}"#,
    )
    .unwrap();

    let state = SessionStore::new(&path).load().unwrap().unwrap();
    assert_eq!(state.train_step, 12);
    assert_eq!(state.models["bob"], CostParams::new(3.0, 0.5));
}
