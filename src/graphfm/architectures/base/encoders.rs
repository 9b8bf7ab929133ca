use burn::{
    module::Module,
    tensor::{backend::Backend, Int, Tensor},
};

use super::deterministic::{DeterministicEmbedding, DeterministicRngContext};

/// Standard deviation of the embedding table initialisation.
pub const EMBEDDING_INIT_STD: f32 = 0.01;

/// Index/value tensors of the multi-value field, each [batch, width].
#[derive(Debug, Clone)]
pub struct MultiValueInputs<B: Backend> {
    pub index: Tensor<B, 2, Int>,
    pub value: Tensor<B, 2>,
}

/// Model inputs for one batch.
///
/// `feature_index`/`feature_value` are [batch, single_value_fields]; the
/// optional multi-value field is aggregated and appended as the last field.
#[derive(Debug, Clone)]
pub struct FieldInputs<B: Backend> {
    pub feature_index: Tensor<B, 2, Int>,
    pub feature_value: Tensor<B, 2>,
    pub multi_value: Option<MultiValueInputs<B>>,
}

impl<B: Backend> FieldInputs<B> {
    pub fn batch_size(&self) -> usize {
        self.feature_index.dims()[0]
    }
}

/// Maps field indices to dense vectors scaled by field values.
#[derive(Module, Debug)]
pub struct FeatureEmbedding<B: Backend> {
    table: DeterministicEmbedding<B>,
    field_size: usize,
}

impl<B: Backend> FeatureEmbedding<B> {
    pub fn new(
        feature_size: usize,
        embedding_size: usize,
        field_size: usize,
        rng_ctx: &DeterministicRngContext<B>,
    ) -> Self {
        Self {
            table: rng_ctx.create_deterministic_embedding(feature_size, embedding_size, EMBEDDING_INIT_STD, 200),
            field_size,
        }
    }

    pub fn embedding_size(&self) -> usize {
        self.table.embedding_dim()
    }

    pub fn feature_size(&self) -> usize {
        self.table.vocab_size()
    }

    /// `table[index] * value` for every (sample, field): [batch, m] -> [batch, m, d]
    pub fn embed_single(&self, index: Tensor<B, 2, Int>, value: Tensor<B, 2>) -> Tensor<B, 3> {
        self.table.forward_2d(index) * value.unsqueeze_dim::<3>(2)
    }

    /// Value-weighted mean of the sub-index embeddings: [batch, g] -> [batch, 1, d]
    ///
    /// Every row must carry at least one non-zero value.
    pub fn embed_multi(&self, index: Tensor<B, 2, Int>, value: Tensor<B, 2>) -> Tensor<B, 3> {
        let weighted = self.embed_single(index, value.clone()).sum_dim(1);
        let total = value.sum_dim(1).unsqueeze_dim::<3>(2);
        weighted / total
    }

    /// Uniform [batch, field_size, d] field tensor for the block stack.
    pub fn forward(&self, inputs: &FieldInputs<B>) -> Tensor<B, 3> {
        let single = self.embed_single(inputs.feature_index.clone(), inputs.feature_value.clone());

        let embeddings = match &inputs.multi_value {
            Some(multi) => {
                let aggregated = self.embed_multi(multi.index.clone(), multi.value.clone());
                Tensor::cat(vec![single, aggregated], 1)
            }
            None => single,
        };

        let fields = embeddings.dims()[1];
        if fields != self.field_size {
            panic!(
                "SHAPE ERROR: embedded {} fields but the model expects field_size = {}",
                fields, self.field_size
            );
        }
        embeddings
    }
}
