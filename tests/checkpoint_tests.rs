use burn_ndarray::NdArray;
use graph_fm_rs::graphfm::architectures::base::{
    checkpoint::{self, CheckpointIndex, CheckpointManager, MAX_TO_KEEP},
    deterministic::DeterministicRngContext,
    model::GraphFm,
};
use graph_fm_rs::test_utils::{random_dataset, scenario_config};
use graph_fm_rs::ModelConfig;

type TestBackend = NdArray<f32>;

fn build(config: &ModelConfig, seed: u64) -> GraphFm<TestBackend> {
    let ctx = DeterministicRngContext::<TestBackend>::new(seed, Default::default());
    GraphFm::new(config, &ctx).unwrap()
}

#[test]
fn test_save_then_restore_reproduces_predictions() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = scenario_config(60);
    config.deep_layers = Some(vec![12, 6]);
    config.batch_norm = true;
    let device = Default::default();
    let data = random_dataset(&config, 5, 3);

    let original = build(&config, 42);
    let expected = original.predict_dataset(&data, 5, &device);

    let path = dir.path().join("model-roundtrip");
    checkpoint::save_model(&original, &path).unwrap();

    let fresh = build(&config, 4242);
    assert_ne!(fresh.predict_dataset(&data, 5, &device), expected);

    let restored = checkpoint::load_model(fresh, &path, &device).unwrap();
    assert_eq!(restored.predict_dataset(&data, 5, &device), expected);
}

#[test]
fn test_manager_saves_only_on_improvement() {
    let dir = tempfile::tempdir().unwrap();
    let config = scenario_config(40);
    let model = build(&config, 1);
    let mut manager = CheckpointManager::new(dir.path().join("0"));

    assert_eq!(manager.best_loss, 1.0);
    assert_eq!(manager.save_if_improved(&model, 10, 1.2).unwrap(), None);
    assert_eq!(manager.save_if_improved(&model, 20, 0.6).unwrap(), Some(1.0));
    assert_eq!(manager.save_if_improved(&model, 30, 0.6).unwrap(), None);
    assert_eq!(manager.save_if_improved(&model, 40, 0.5).unwrap(), Some(0.6));

    let index = CheckpointManager::read_index(manager.run_dir()).unwrap().unwrap();
    assert_eq!(index.checkpoints, vec!["model-20".to_string(), "model-40".to_string()]);
    assert!(manager.run_dir().join("model-40.mpk").exists());
}

#[test]
fn test_manager_prunes_old_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let config = scenario_config(40);
    let model = build(&config, 1);
    let manager = CheckpointManager::new(dir.path());

    for step in 1..=MAX_TO_KEEP + 2 {
        manager.save(&model, step).unwrap();
    }

    let index: CheckpointIndex = CheckpointManager::read_index(dir.path()).unwrap().unwrap();
    assert_eq!(index.checkpoints.len(), MAX_TO_KEEP);
    assert_eq!(index.latest(), Some(format!("model-{}", MAX_TO_KEEP + 2).as_str()));
    assert!(!dir.path().join("model-1.mpk").exists());
    assert!(!dir.path().join("model-2.mpk").exists());
    assert!(dir.path().join("model-3.mpk").exists());
}

#[test]
fn test_restore_latest_without_index_leaves_model_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let config = scenario_config(40);
    let device = Default::default();
    let data = random_dataset(&config, 3, 9);

    let model = build(&config, 5);
    let before = model.predict_dataset(&data, 3, &device);
    let (model, restored) = CheckpointManager::restore_latest(model, dir.path(), &device).unwrap();

    assert!(restored.is_none());
    assert_eq!(model.predict_dataset(&data, 3, &device), before);
}

#[test]
fn test_restore_latest_picks_newest_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let config = scenario_config(40);
    let device = Default::default();
    let data = random_dataset(&config, 3, 10);

    let manager = CheckpointManager::new(dir.path());
    manager.save(&build(&config, 1), 1).unwrap();
    let newest = build(&config, 2);
    manager.save(&newest, 2).unwrap();

    let (restored, path) = CheckpointManager::restore_latest(build(&config, 3), dir.path(), &device).unwrap();
    assert_eq!(path, Some(dir.path().join("model-2")));
    assert_eq!(
        restored.predict_dataset(&data, 3, &device),
        newest.predict_dataset(&data, 3, &device)
    );
}
