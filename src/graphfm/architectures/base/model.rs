use burn::{
    module::{Ignored, Module},
    tensor::{activation, backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};

use super::{
    block_stack::BlockStack,
    config::ModelConfig,
    data::CtrDataset,
    deterministic::{DeterministicLinear, DeterministicRngContext},
    encoders::{FeatureEmbedding, FieldInputs},
    layer::TrainPhase,
    loss_utils,
    mlp::DeepNetwork,
    validation::{self, EvaluationMetrics},
};

/// Pools the block outputs into one logit, plus the optional deep branch.
#[derive(Module, Debug)]
pub struct PredictionHead<B: Backend> {
    pub(crate) projection: DeterministicLinear<B>,
    deep: Option<DeepNetwork<B>>,
}

impl<B: Backend> PredictionHead<B> {
    pub fn new(config: &ModelConfig, rng_ctx: &DeterministicRngContext<B>) -> Self {
        let pooled = config.pooled_width();
        let std = (2.0 / (pooled + 1) as f32).sqrt();

        Self {
            projection: rng_ctx.create_linear_with_std(pooled, 1, true, std, 300),
            deep: config
                .deep_layers
                .as_deref()
                .map(|hidden| DeepNetwork::new(config, hidden, rng_ctx)),
        }
    }

    /// Concatenates the layer outputs on the feature axis, averages over
    /// fields and projects to [batch, 1]; adds the deep logit when present.
    pub fn forward(
        &self,
        layer_outputs: &[Tensor<B, 3>],
        embeddings: Tensor<B, 3>,
        deep_keep_prob: f64,
        phase: &mut TrainPhase,
    ) -> Tensor<B, 2> {
        let pooled = Tensor::cat(layer_outputs.to_vec(), 2).mean_dim(1);
        let [batch, _, width] = pooled.dims();
        let logit = self.projection.forward(pooled.reshape([batch, width]));

        match &self.deep {
            Some(deep) => logit + deep.forward(embeddings, deep_keep_prob, phase),
            None => logit,
        }
    }

    pub fn l2_penalty(&self) -> Option<Tensor<B, 1>> {
        self.deep.as_ref().map(DeepNetwork::l2_penalty)
    }
}

/// Result of one forward pass.
#[derive(Debug, Clone)]
pub struct GraphFmOutput<B: Backend> {
    /// Model output [batch, 1]: probabilities, or raw scores under `mse`
    pub prediction: Tensor<B, 2>,
    /// [batch, blocks, fields, fields]
    pub visibility: Tensor<B, 4>,
}

/// One sample with its prediction and selection matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationRecord {
    pub feature_index: Vec<usize>,
    pub feature_value: Vec<f32>,
    pub multi_value_index: Option<Vec<usize>>,
    pub multi_value_value: Option<Vec<f32>>,
    pub label: f32,
    pub prediction: f32,
    pub blocks: usize,
    pub field_size: usize,
    /// Row-major [blocks, field_size, field_size]
    pub visibility: Vec<f32>,
}

impl VisualizationRecord {
    /// Selection row of query field `field` in block layer `layer`.
    pub fn visibility_row(&self, layer: usize, field: usize) -> &[f32] {
        let start = (layer * self.field_size + field) * self.field_size;
        &self.visibility[start..start + self.field_size]
    }
}

/// GraphFM: field embeddings, sparse graph-attention block stack and
/// prediction head.
#[derive(Module, Debug)]
pub struct GraphFm<B: Backend> {
    embedding: FeatureEmbedding<B>,
    blocks: BlockStack<B>,
    pub(crate) head: PredictionHead<B>,
    config: Ignored<ModelConfig>,
}

impl<B: Backend> GraphFm<B> {
    pub fn new(config: &ModelConfig, rng_ctx: &DeterministicRngContext<B>) -> Result<Self, String> {
        config.validate_consistent()?;

        Ok(Self {
            embedding: FeatureEmbedding::new(config.feature_size, config.embedding_size, config.field_size, rng_ctx),
            blocks: BlockStack::new(config, rng_ctx),
            head: PredictionHead::new(config, rng_ctx),
            config: Ignored(config.clone()),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn forward(&self, inputs: &FieldInputs<B>, phase: &mut TrainPhase) -> GraphFmOutput<B> {
        let [attention_keep, embedding_keep, deep_keep] = self.config.dropout_keep_prob;

        let embeddings = phase.dropout(self.embedding.forward(inputs), embedding_keep);
        let stack = self.blocks.forward(embeddings.clone(), attention_keep, phase);
        let logit = self.head.forward(&stack.layer_outputs, embeddings, deep_keep, phase);

        let prediction = if self.config.loss_type.applies_sigmoid() {
            activation::sigmoid(logit)
        } else {
            logit
        };

        GraphFmOutput {
            prediction,
            visibility: stack.visibility,
        }
    }

    /// Configured loss of `prediction` against [batch, 1] labels, plus the
    /// L2 penalty on the deep branch when `l2_reg > 0`.
    pub fn loss(&self, prediction: Tensor<B, 2>, labels: Tensor<B, 2>) -> Tensor<B, 1> {
        let loss = loss_utils::compute_loss(self.config.loss_type, prediction, labels);

        match self.head.l2_penalty() {
            Some(penalty) if self.config.l2_reg > 0.0 => loss + penalty.mul_scalar(self.config.l2_reg),
            _ => loss,
        }
    }

    /// Eval-mode scores for one batch: [batch].
    pub fn predict(&self, inputs: &FieldInputs<B>) -> Tensor<B, 1> {
        let prediction = self.forward(inputs, &mut TrainPhase::Eval).prediction;
        let [batch, _] = prediction.dims();
        prediction.reshape([batch])
    }

    /// Eval-mode scores of every row, computed `batch_size` rows at a time.
    pub fn predict_dataset(&self, data: &CtrDataset, batch_size: usize, device: &B::Device) -> Vec<f32> {
        data.batches(batch_size)
            .flat_map(|batch| {
                self.predict(&batch.to_inputs(device))
                    .into_data()
                    .iter::<f32>()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// AUC and log-loss of the clipped predictions against the dataset labels.
    pub fn evaluate(&self, data: &CtrDataset, batch_size: usize, device: &B::Device) -> Result<EvaluationMetrics, String> {
        let predictions = self.predict_dataset(data, batch_size, device);
        validation::evaluate_predictions(&data.labels, &predictions)
    }

    /// One record per row with the [blocks, fields, fields] selection matrices.
    pub fn visualize(&self, data: &CtrDataset, batch_size: usize, device: &B::Device) -> Vec<VisualizationRecord> {
        let blocks = self.config.blocks;
        let field_size = self.config.field_size;
        let per_sample = blocks * field_size * field_size;
        let mut records = Vec::with_capacity(data.len());

        for batch in data.batches(batch_size) {
            let output = self.forward(&batch.to_inputs(device), &mut TrainPhase::Eval);
            let predictions: Vec<f32> = output.prediction.into_data().iter::<f32>().collect();
            let visibility: Vec<f32> = output.visibility.into_data().iter::<f32>().collect();

            for (row, vis) in visibility.chunks(per_sample).enumerate() {
                records.push(VisualizationRecord {
                    feature_index: batch.feature_index[row].clone(),
                    feature_value: batch.feature_value[row].clone(),
                    multi_value_index: batch.multi_value.as_ref().map(|m| m.index[row].clone()),
                    multi_value_value: batch.multi_value.as_ref().map(|m| m.value[row].clone()),
                    label: batch.labels[row],
                    prediction: predictions[row],
                    blocks,
                    field_size,
                    visibility: vis.to_vec(),
                });
            }
        }

        records
    }

    /// Logs and returns (total, extra) trainable parameter counts; extra
    /// excludes the embedding table.
    pub fn count_param(&self) -> (usize, usize) {
        let total = self.num_params();
        let extra = total - self.embedding.feature_size() * self.embedding.embedding_size();
        log::info!("total parameters :{}", total);
        log::info!("extra parameters : {}", extra);
        (total, extra)
    }
}

/// Writes `records` to `dir/visualization-{ks:?}.json` and returns the path.
pub fn save_visualization(
    records: &[VisualizationRecord],
    dir: &std::path::Path,
    ks: &[usize],
) -> Result<std::path::PathBuf, String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("cannot create {}: {}", dir.display(), e))?;
    let path = dir.join(format!("visualization-{:?}.json", ks));
    let json = serde_json::to_string(records).map_err(|e| format!("cannot serialise visualization: {}", e))?;
    std::fs::write(&path, json).map_err(|e| format!("cannot write {}: {}", path.display(), e))?;
    log::info!("saved {} visualization records to {}", records.len(), path.display());
    Ok(path)
}
