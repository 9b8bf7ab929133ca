//! GraphFM-rs: graph factorization machines for CTR feature-interaction modeling

pub mod graphfm;

pub use graphfm::architectures::base::{
    config::{LossType, ModelConfig, OptimizerType},
    data::{CtrDataset, MultiValueField, SyntheticCtrPrior},
    model::{GraphFm, VisualizationRecord},
    train::{GraphFmTrainer, TrainingConfig},
};
pub use graphfm::settings::{settings, Settings};

/// Test utilities for backend-aware tensor construction and small fixtures
pub mod test_utils;
