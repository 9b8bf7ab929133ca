use burn::{
    module::Module,
    tensor::{activation, backend::Backend, Tensor},
};

use super::{
    config::ModelConfig,
    deterministic::{DeterministicLinear, DeterministicRngContext},
    layer::{DenseBatchNorm, TrainPhase},
};

/// Fully connected side branch on the flattened field embeddings.
///
/// Each hidden layer is linear -> (batch norm) -> ReLU -> dropout; a final
/// linear layer reduces to one logit per sample.
#[derive(Module, Debug)]
pub struct DeepNetwork<B: Backend> {
    layers: Vec<DeterministicLinear<B>>,
    batch_norms: Vec<DenseBatchNorm<B>>,
    output: DeterministicLinear<B>,
}

impl<B: Backend> DeepNetwork<B> {
    pub fn new(config: &ModelConfig, hidden: &[usize], rng_ctx: &DeterministicRngContext<B>) -> Self {
        let mut input_dim = config.field_size * config.embedding_size;
        let mut layers = Vec::with_capacity(hidden.len());
        let mut batch_norms = Vec::new();

        for (i, &width) in hidden.iter().enumerate() {
            layers.push(rng_ctx.create_deterministic_linear(input_dim, width, true, 100 + i as u64));
            if config.batch_norm {
                batch_norms.push(DenseBatchNorm::new(width, config.batch_norm_decay, rng_ctx.device()));
            }
            input_dim = width;
        }

        Self {
            layers,
            batch_norms,
            output: rng_ctx.create_deterministic_linear(input_dim, 1, true, 150),
        }
    }

    /// embeddings: [batch, fields, d] -> logits [batch, 1]
    pub fn forward(&self, embeddings: Tensor<B, 3>, keep_prob: f64, phase: &mut TrainPhase) -> Tensor<B, 2> {
        let [batch, fields, dim] = embeddings.dims();
        let mut x = embeddings.reshape([batch, fields * dim]);

        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(x);
            if let Some(bn) = self.batch_norms.get(i) {
                x = bn.forward(x, phase);
            }
            x = phase.dropout(activation::relu(x), keep_prob);
        }

        self.output.forward(x)
    }

    /// `Σ ½‖W‖²` over the hidden weight matrices. The output projection is
    /// not regularised.
    pub fn l2_penalty(&self) -> Tensor<B, 1> {
        let device = self.output.weight.val().device();
        self.layers
            .iter()
            .map(|layer| layer.half_squared_norm())
            .fold(Tensor::zeros([1], &device), |acc, term| acc + term)
    }
}
