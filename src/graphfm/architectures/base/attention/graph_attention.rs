use burn::{
    module::Module,
    tensor::{activation, backend::Backend, Tensor},
};

use super::super::{
    deterministic::{DeterministicLinear, DeterministicRngContext},
    layer::{Normalizer, TrainPhase},
};
use super::structure::GraphStructureSelector;

/// Weights every field of one block layer shares: the per-head attention
/// scorer and the structure selector.
#[derive(Module, Debug)]
pub struct SharedBlockWeights<B: Backend> {
    pub attention_score: DeterministicLinear<B>,
    pub selector: GraphStructureSelector<B>,
}

impl<B: Backend> SharedBlockWeights<B> {
    pub fn new(input_dim: usize, num_heads: usize, rng_ctx: &DeterministicRngContext<B>, offset: u64) -> Self {
        Self {
            attention_score: rng_ctx.create_deterministic_linear(input_dim, num_heads, true, offset),
            selector: GraphStructureSelector::new(input_dim, rng_ctx, offset + 1),
        }
    }
}

/// Output of one field's attention block.
#[derive(Debug, Clone)]
pub struct AttentionOutput<B: Backend> {
    /// Updated field state [batch, 1, num_units]
    pub state: Tensor<B, 3>,
    /// Selected relevance scores [batch, 1, fields]
    pub visibility: Tensor<B, 3>,
}

/// Multi-head attention of one field over its selected neighbours.
///
/// The value and residual projections belong to a single (layer, field)
/// pair; scoring weights come from the layer's [`SharedBlockWeights`].
#[derive(Module, Debug)]
pub struct MultiHeadAttentionBlock<B: Backend> {
    value_proj: DeterministicLinear<B>,
    residual: Option<DeterministicLinear<B>>,
    normalizer: Normalizer<B>,
    num_units: usize,
    num_heads: usize,
}

impl<B: Backend> MultiHeadAttentionBlock<B> {
    pub fn new(
        input_dim: usize,
        num_units: usize,
        num_heads: usize,
        has_residual: bool,
        rng_ctx: &DeterministicRngContext<B>,
        offset: u64,
    ) -> Self {
        if num_units % num_heads != 0 {
            panic!(
                "SHAPE ERROR: num_units {} is not divisible by {} heads",
                num_units, num_heads
            );
        }

        Self {
            value_proj: rng_ctx.create_deterministic_linear(input_dim, num_units, false, offset),
            residual: has_residual
                .then(|| rng_ctx.create_deterministic_linear(input_dim, num_units, true, offset + 1)),
            normalizer: Normalizer::new(num_units, rng_ctx),
            num_units,
            num_heads,
        }
    }

    /// Softmax attention weights over the field axis and the selection they
    /// were gated by.
    ///
    /// values: [batch, fields, d] -> ([batch, fields, heads], [batch, fields])
    ///
    /// Masked fields enter the softmax with logit 0, so they keep a small
    /// non-zero weight.
    pub fn attend(
        &self,
        shared: &SharedBlockWeights<B>,
        values: Tensor<B, 3>,
        k: usize,
    ) -> (Tensor<B, 3>, Tensor<B, 2>) {
        let [batch, fields, _] = values.dims();

        let logits = activation::relu(shared.attention_score.forward_3d(values.clone()));
        let selection = shared.selector.select(values, k);
        let gate = selection
            .clone()
            .reshape([batch, fields, 1])
            .repeat_dim(2, self.num_heads);

        (activation::softmax(logits * gate, 1), selection)
    }

    /// queries: [batch, 1, d], values: [batch, fields, d]
    pub fn forward(
        &self,
        shared: &SharedBlockWeights<B>,
        queries: Tensor<B, 3>,
        values: Tensor<B, 3>,
        k: usize,
        keep_prob: f64,
        phase: &mut TrainPhase,
    ) -> AttentionOutput<B> {
        let [batch, fields, _] = values.dims();
        let head_dim = self.num_units / self.num_heads;

        let projected = self
            .value_proj
            .forward_3d(values.clone())
            .reshape([batch, fields, self.num_heads, head_dim]);

        let (weights, selection) = self.attend(shared, values, k);
        let weights = phase.dropout(weights, keep_prob);

        let mut state = (weights.unsqueeze_dim::<4>(3) * projected)
            .sum_dim(1)
            .reshape([batch, 1, self.num_units]);

        if let Some(residual) = &self.residual {
            state = state + activation::relu(residual.forward_3d(queries));
        }

        let state = self.normalizer.forward(activation::relu(state));

        AttentionOutput {
            state,
            visibility: selection.reshape([batch, 1, fields]),
        }
    }
}
