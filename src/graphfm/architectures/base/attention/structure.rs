use burn::{
    module::Module,
    tensor::{activation, backend::Backend, Tensor},
};

use super::super::deterministic::{DeterministicLinear, DeterministicRngContext};

/// Hidden width of the relevance scorer.
pub const SELECTOR_HIDDEN_UNITS: usize = 16;

/// Learns which fields each query field should attend to.
///
/// One selector exists per block layer and scores every field of every query
/// with the same two-layer network (hidden 16 + ReLU, scalar + sigmoid).
#[derive(Module, Debug)]
pub struct GraphStructureSelector<B: Backend> {
    hidden: DeterministicLinear<B>,
    score: DeterministicLinear<B>,
}

impl<B: Backend> GraphStructureSelector<B> {
    pub fn new(input_dim: usize, rng_ctx: &DeterministicRngContext<B>, offset: u64) -> Self {
        Self {
            hidden: rng_ctx.create_deterministic_linear(input_dim, SELECTOR_HIDDEN_UNITS, true, offset),
            score: rng_ctx.create_deterministic_linear(SELECTOR_HIDDEN_UNITS, 1, true, offset + 1),
        }
    }

    /// Relevance in (0, 1) of every field: [batch, fields, d] -> [batch, fields]
    pub fn relevance(&self, values: Tensor<B, 3>) -> Tensor<B, 2> {
        let hidden = activation::relu(self.hidden.forward_3d(values));
        let scores = activation::sigmoid(self.score.forward_3d(hidden));
        let [batch, fields, _] = scores.dims();
        scores.reshape([batch, fields])
    }

    /// Relevance scores with everything below the k-th largest zeroed.
    pub fn select(&self, values: Tensor<B, 3>, k: usize) -> Tensor<B, 2> {
        top_k_filter(self.relevance(values), k)
    }
}

/// Keeps every score `>=` the k-th largest in its row and zeroes the rest.
///
/// Ties at the threshold are all kept, so a row can hold more than `k`
/// non-zero entries. Surviving entries keep their score, not a 0/1 flag.
pub fn top_k_filter<B: Backend>(scores: Tensor<B, 2>, k: usize) -> Tensor<B, 2> {
    let [_, fields] = scores.dims();
    if k == 0 || k > fields {
        panic!("SHAPE ERROR: top-k budget {} outside [1, {}]", k, fields);
    }

    let kth = scores.clone().detach().topk(k, 1).min_dim(1).repeat_dim(1, fields);
    let keep = scores.clone().greater_equal(kth).float();
    scores * keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_top_k_keeps_scores_not_flags() {
        let device = Default::default();
        let scores = Tensor::<TestBackend, 1>::from_floats([0.9, 0.2, 0.7, 0.4].as_slice(), &device)
            .reshape([1, 4]);
        let out: Vec<f32> = top_k_filter(scores, 2).into_data().to_vec().unwrap();
        assert_eq!(out, vec![0.9, 0.0, 0.7, 0.0]);
    }

    #[test]
    fn test_relevance_in_unit_interval() {
        let device = Default::default();
        let ctx = DeterministicRngContext::<TestBackend>::new(5, device);
        let selector = GraphStructureSelector::new(6, &ctx, 900);
        let values = ctx.generate_normal_tensor([2, 5, 6], &mut ctx.rng_at(1), 0.0, 1.0);
        let scores: Vec<f32> = selector.relevance(values).into_data().to_vec().unwrap();
        assert_eq!(scores.len(), 10);
        assert!(scores.iter().all(|&s| s > 0.0 && s < 1.0));
    }
}
