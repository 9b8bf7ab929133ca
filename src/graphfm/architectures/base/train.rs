// train.rs - GraphFM training loop
use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::{
    config::Config,
    module::AutodiffModule,
    optim::{
        adaptor::OptimizerAdaptor, momentum::MomentumConfig, AdaGrad, AdaGradConfig, Adam, AdamConfig,
        GradientsParams, Optimizer, Sgd, SgdConfig,
    },
    tensor::backend::AutodiffBackend,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::checkpoint::CheckpointManager;
use super::config::{ModelConfig, OptimizerType};
use super::data::CtrDataset;
use super::deterministic::DeterministicRngContext;
use super::layer::TrainPhase;
use super::loss_utils;
use super::model::{GraphFm, VisualizationRecord};
use super::validation::EvaluationMetrics;

/// Training configuration for GraphFM
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Model configuration
    pub model: ModelConfig,
    #[config(default = "OptimizerType::Adam")]
    pub optimizer: OptimizerType,
    #[config(default = 0.001)]
    pub learning_rate: f64,
    #[config(default = 1024)]
    pub batch_size: usize,
    #[config(default = 2)]
    pub num_epochs: usize,
    /// Log a progress line every `verbose` files; 0 disables progress lines
    #[config(default = 1)]
    pub verbose: usize,
    /// Direction of the validation metric checked by early stopping
    #[config(default = false)]
    pub greater_is_better: bool,
    #[config(default = true)]
    pub early_stopping: bool,
    /// Checkpoint root; checkpoints go to `save_path/run_count/`
    pub save_path: Option<PathBuf>,
    #[config(default = 0)]
    pub run_count: usize,
}

impl TrainingConfig {
    pub fn run_dir(&self) -> Option<PathBuf> {
        self.save_path
            .as_ref()
            .map(|root| root.join(self.run_count.to_string()))
    }
}

/// One of the four supported optimizers, stepping a [`GraphFm`].
pub enum GraphFmOptimizer<B: AutodiffBackend> {
    Adam(OptimizerAdaptor<Adam, GraphFm<B>, B>),
    AdaGrad(OptimizerAdaptor<AdaGrad, GraphFm<B>, B>),
    Sgd(OptimizerAdaptor<Sgd<B::InnerBackend>, GraphFm<B>, B>),
}

impl<B: AutodiffBackend> GraphFmOptimizer<B> {
    pub fn new(kind: OptimizerType) -> Self {
        match kind {
            OptimizerType::Adam => Self::Adam(
                AdamConfig::new()
                    .with_beta_1(0.9)
                    .with_beta_2(0.999)
                    .with_epsilon(1e-8)
                    .init(),
            ),
            OptimizerType::Adagrad => Self::AdaGrad(AdaGradConfig::new().with_epsilon(1e-8).init()),
            OptimizerType::Gd => Self::Sgd(SgdConfig::new().init()),
            OptimizerType::Momentum => Self::Sgd(
                SgdConfig::new()
                    .with_momentum(Some(MomentumConfig::new().with_momentum(0.95).with_dampening(0.0)))
                    .init(),
            ),
        }
    }

    pub fn step(&mut self, learning_rate: f64, model: GraphFm<B>, grads: GradientsParams) -> GraphFm<B> {
        match self {
            Self::Adam(optim) => optim.step(learning_rate, model, grads),
            Self::AdaGrad(optim) => optim.step(learning_rate, model, grads),
            Self::Sgd(optim) => optim.step(learning_rate, model, grads),
        }
    }
}

/// Per-evaluation metric history of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub train_result: Vec<f64>,
    pub train_loss: Vec<f64>,
    pub valid_result: Vec<f64>,
    pub valid_loss: Vec<f64>,
}

/// True when the last five entries of `valid` move strictly in the worsening
/// direction. Needs more than five entries.
pub fn training_termination(valid: &[f64], greater_is_better: bool) -> bool {
    if valid.len() <= 5 {
        return false;
    }
    let last = &valid[valid.len() - 5..];
    last.windows(2).all(|pair| {
        if greater_is_better {
            pair[1] < pair[0]
        } else {
            pair[1] > pair[0]
        }
    })
}

/// GraphFM training state
pub struct GraphFmTrainer<B: AutodiffBackend> {
    pub model: GraphFm<B>,
    pub config: TrainingConfig,
    pub global_step: usize,
    pub history: TrainingHistory,
    optimizer: GraphFmOptimizer<B>,
    rng_context: DeterministicRngContext<B>,
    checkpoints: Option<CheckpointManager>,
    shuffle_rng: StdRng,
}

impl<B: AutodiffBackend> GraphFmTrainer<B> {
    pub fn new(config: TrainingConfig, device: &B::Device) -> Result<Self, String> {
        if config.batch_size == 0 {
            return Err("batch_size must be positive".to_string());
        }
        if !(config.learning_rate > 0.0) {
            return Err(format!("learning_rate {} must be positive", config.learning_rate));
        }

        let rng_context = DeterministicRngContext::new(config.model.seed, device.clone());
        let model = GraphFm::new(&config.model, &rng_context)?;
        model.count_param();

        let checkpoints = match config.run_dir() {
            Some(dir) => {
                std::fs::create_dir_all(&dir).map_err(|e| format!("cannot create {}: {}", dir.display(), e))?;
                config
                    .save(dir.join("config.json"))
                    .map_err(|e| format!("cannot save training config: {}", e))?;
                Some(CheckpointManager::new(dir))
            }
            None => None,
        };

        Ok(Self {
            model,
            optimizer: GraphFmOptimizer::new(config.optimizer),
            shuffle_rng: StdRng::seed_from_u64(config.model.seed.wrapping_add(7)),
            rng_context,
            checkpoints,
            global_step: 0,
            history: TrainingHistory::default(),
            config,
        })
    }

    pub fn device(&self) -> &B::Device {
        self.rng_context.device()
    }

    pub fn best_loss(&self) -> Option<f64> {
        self.checkpoints.as_ref().map(|c| c.best_loss)
    }

    /// Checkpoint manager of the run, when a save path is configured.
    pub fn checkpoints_mut(&mut self) -> Option<&mut CheckpointManager> {
        self.checkpoints.as_mut()
    }

    /// One optimizer step on `batch`; returns (global_step, loss).
    pub fn fit_on_batch(&mut self, batch: &CtrDataset) -> (usize, f32) {
        if batch.is_empty() {
            panic!("SHAPE ERROR: fit_on_batch called with an empty batch");
        }
        let device = self.device().clone();

        let mut phase = TrainPhase::train(self.rng_context.seed + 1000 + self.global_step as u64);
        let output = self.model.forward(&batch.to_inputs(&device), &mut phase);
        let loss = self.model.loss(output.prediction, batch.label_tensor(&device));
        let loss_value = loss_utils::validate_loss_value(&loss, self.global_step);

        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = self
            .optimizer
            .step(self.config.learning_rate, self.model.clone(), grads);
        self.global_step += 1;

        log::debug!("step {} loss {:.6}", self.global_step, loss_value);
        (self.global_step, loss_value)
    }

    /// One pass over `train` (full batches only) followed by evaluation.
    ///
    /// Returns `Ok(false)` when early stopping fires.
    pub fn fit_once(
        &mut self,
        train: &mut CtrDataset,
        epoch: usize,
        file_count: usize,
        valid: Option<&CtrDataset>,
        early_stopping: bool,
    ) -> Result<bool, String> {
        let started = Instant::now();
        train.shuffle_in_unison(&mut self.shuffle_rng);

        let total_batch = train.len() / self.config.batch_size;
        for i in 0..total_batch {
            let batch = train.get_batch(self.config.batch_size, i);
            self.fit_on_batch(&batch);
        }

        let train_metrics = self.evaluate(train)?;
        self.history.train_result.push(train_metrics.auc);
        self.history.train_loss.push(train_metrics.log_loss);

        let valid_metrics = match valid {
            Some(valid) => {
                let metrics = self.evaluate(valid)?;
                self.history.valid_result.push(metrics.auc);
                self.history.valid_loss.push(metrics.log_loss);

                if let Some(checkpoints) = self.checkpoints.as_mut() {
                    if let Some(old_loss) =
                        checkpoints.save_if_improved(&self.model, self.global_step, metrics.log_loss)?
                    {
                        log::info!(
                            "[{}-{}] model saved!. Valid loss is improved from {:.4} to {:.4}",
                            epoch,
                            file_count,
                            old_loss,
                            metrics.log_loss
                        );
                    }
                }
                Some(metrics)
            }
            None => None,
        };

        let verbose = self.config.verbose;
        if verbose > 0 && ((epoch.saturating_sub(1)) * 9 + file_count) % verbose == 0 {
            let elapsed = started.elapsed().as_secs_f64();
            match valid_metrics {
                Some(v) => log::info!(
                    "[{}-{}] train-result={:.4}, train-logloss={:.4}, valid-result={:.4}, valid-logloss={:.4} [{:.1} s]",
                    epoch,
                    file_count,
                    train_metrics.auc,
                    train_metrics.log_loss,
                    v.auc,
                    v.log_loss,
                    elapsed
                ),
                None => log::info!(
                    "[{}-{}] train-result={:.4} [{:.1} s]",
                    epoch,
                    file_count,
                    train_metrics.auc,
                    elapsed
                ),
            }
        }

        let stop = valid.is_some()
            && early_stopping
            && training_termination(&self.history.valid_loss, self.config.greater_is_better);
        if stop {
            log::info!("[{}-{}] early stopping: validation loss keeps worsening", epoch, file_count);
        }
        Ok(!stop)
    }

    /// Runs `fit_once` for every configured epoch (one file per epoch).
    pub fn fit(&mut self, train: &mut CtrDataset, valid: Option<&CtrDataset>) -> Result<&TrainingHistory, String> {
        train.validate(&self.config.model)?;
        if let Some(valid) = valid {
            valid.validate(&self.config.model)?;
        }

        for epoch in 1..=self.config.num_epochs {
            if !self.fit_once(train, epoch, 1, valid, self.config.early_stopping)? {
                break;
            }
        }
        Ok(&self.history)
    }

    /// Inference-mode scores of every row.
    pub fn predict(&self, data: &CtrDataset) -> Vec<f32> {
        let device = self.device().clone();
        self.model.valid().predict_dataset(data, self.config.batch_size, &device)
    }

    pub fn evaluate(&self, data: &CtrDataset) -> Result<EvaluationMetrics, String> {
        let device = self.device().clone();
        self.model.valid().evaluate(data, self.config.batch_size, &device)
    }

    pub fn visualize(&self, data: &CtrDataset) -> Vec<VisualizationRecord> {
        let device = self.device().clone();
        self.model.valid().visualize(data, self.config.batch_size, &device)
    }

    /// Loads the latest checkpoint from `save_path`, defaulting to the run
    /// directory. Returns whether one was found.
    pub fn restore(&mut self, save_path: Option<&Path>) -> Result<bool, String> {
        let dir = match save_path {
            Some(path) => path.to_path_buf(),
            None => match self.config.run_dir() {
                Some(dir) => dir,
                None => return Ok(false),
            },
        };

        let device = self.device().clone();
        let (model, restored) = CheckpointManager::restore_latest(self.model.clone(), &dir, &device)?;
        self.model = model;
        Ok(restored.is_some())
    }
}
