use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use graph_fm_rs::graphfm::architectures::base::model::save_visualization;
use graph_fm_rs::{settings, GraphFmTrainer, ModelConfig, SyntheticCtrPrior, TrainingConfig};

type TrainBackend = Autodiff<NdArray<f32>>;

fn main() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = settings();
    log::info!("GraphFM-rs starting (data_path = {:?})", settings.graphfm.data_path);

    let mut model = ModelConfig::new(10, 400);
    model.embedding_size = 8;
    model.block_shape = vec![16, 16];
    model.ks = vec![6, 3];
    model.deep_layers = Some(vec![32, 32]);
    model.dropout_keep_prob = [0.9, 1.0, 0.8];
    model.multi_value_field = Some(6);

    let prior = SyntheticCtrPrior::for_config(&model);
    let (train_rows, valid_rows) = if settings.testing.ci { (256, 64) } else { (4096, 1024) };
    let mut train = prior.sample(train_rows, model.seed);
    let valid = prior.sample(valid_rows, model.seed + 1);

    let config = TrainingConfig::new(model)
        .with_batch_size(128)
        .with_num_epochs(if settings.testing.ci { 1 } else { 5 })
        .with_save_path(settings.graphfm.checkpoint_dir.clone());

    let device = Default::default();
    let mut trainer = GraphFmTrainer::<TrainBackend>::new(config, &device)?;
    trainer.fit(&mut train, Some(&valid))?;

    if trainer.restore(None)? {
        log::info!("evaluating best checkpoint");
    }
    let metrics = trainer.evaluate(&valid)?;
    log::info!("valid auc={:.4} logloss={:.4}", metrics.auc, metrics.log_loss);

    let records = trainer.visualize(&valid.get_batch(trainer.config.batch_size, 0));
    save_visualization(&records, &settings.graphfm.data_path, &trainer.config.model.ks)?;

    Ok(())
}
