use burn::{
    module::Module,
    tensor::{backend::Backend, Tensor},
};

use super::{
    attention::{MultiHeadAttentionBlock, SharedBlockWeights},
    config::ModelConfig,
    deterministic::DeterministicRngContext,
    layer::TrainPhase,
};

/// One block layer: shared scoring weights plus one attention block per field.
#[derive(Module, Debug)]
pub struct BlockLayer<B: Backend> {
    shared: SharedBlockWeights<B>,
    fields: Vec<MultiHeadAttentionBlock<B>>,
    k: usize,
}

impl<B: Backend> BlockLayer<B> {
    pub fn new(config: &ModelConfig, layer: usize, rng_ctx: &DeterministicRngContext<B>) -> Self {
        let input_dim = config.block_input_width(layer);
        let num_units = config.block_shape[layer];
        let base = 1000 * (layer as u64 + 1);

        let fields = (0..config.field_size)
            .map(|field| {
                MultiHeadAttentionBlock::new(
                    input_dim,
                    num_units,
                    config.heads,
                    config.has_residual,
                    rng_ctx,
                    base + 10 * field as u64,
                )
            })
            .collect();

        Self {
            shared: SharedBlockWeights::new(input_dim, config.heads, rng_ctx, base + 900),
            fields,
            k: config.ks[layer],
        }
    }

    /// h: [batch, fields, d_in] -> ([batch, fields, units], [batch, fields, fields])
    pub fn forward(&self, h: Tensor<B, 3>, keep_prob: f64, phase: &mut TrainPhase) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let [_, field_size, _] = h.dims();
        if field_size != self.fields.len() {
            panic!(
                "SHAPE ERROR: block layer built for {} fields received {}",
                self.fields.len(),
                field_size
            );
        }

        let mut states = Vec::with_capacity(field_size);
        let mut visibility = Vec::with_capacity(field_size);

        for (j, block) in self.fields.iter().enumerate() {
            let query = h.clone().narrow(1, j, 1);
            let values = query.clone().repeat_dim(1, field_size) * h.clone();

            let output = block.forward(&self.shared, query, values, self.k, keep_prob, phase);
            states.push(output.state);
            visibility.push(output.visibility);
        }

        (Tensor::cat(states, 1), Tensor::cat(visibility, 1))
    }
}

/// Per-layer field representations and selection matrices of one pass.
#[derive(Debug, Clone)]
pub struct BlockStackOutput<B: Backend> {
    /// One [batch, fields, block_shape[i]] tensor per layer
    pub layer_outputs: Vec<Tensor<B, 3>>,
    /// [batch, blocks, fields, fields]
    pub visibility: Tensor<B, 4>,
}

/// Sequential stack of block layers.
#[derive(Module, Debug)]
pub struct BlockStack<B: Backend> {
    layers: Vec<BlockLayer<B>>,
}

impl<B: Backend> BlockStack<B> {
    pub fn new(config: &ModelConfig, rng_ctx: &DeterministicRngContext<B>) -> Self {
        let layers = (0..config.blocks)
            .map(|layer| BlockLayer::new(config, layer, rng_ctx))
            .collect();
        Self { layers }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Runs every layer on the previous layer's output.
    ///
    /// embeddings: [batch, fields, embedding_size]
    pub fn forward(&self, embeddings: Tensor<B, 3>, keep_prob: f64, phase: &mut TrainPhase) -> BlockStackOutput<B> {
        let mut h = embeddings;
        let mut layer_outputs = Vec::with_capacity(self.layers.len());
        let mut visibility = Vec::with_capacity(self.layers.len());

        for (i, layer) in self.layers.iter().enumerate() {
            let (next, vis) = layer.forward(h, keep_prob, phase);
            log::debug!("block layer {} -> {:?}", i, next.dims());
            layer_outputs.push(next.clone());
            visibility.push(vis);
            h = next;
        }

        BlockStackOutput {
            layer_outputs,
            visibility: Tensor::stack(visibility, 1),
        }
    }
}
