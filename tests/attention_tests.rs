use burn::module::Module;
use burn::tensor::{activation, Tensor};
use burn_ndarray::NdArray;
use graph_fm_rs::graphfm::architectures::base::{
    attention::{top_k_filter, MultiHeadAttentionBlock, SharedBlockWeights},
    block_stack::BlockLayer,
    deterministic::DeterministicRngContext,
    layer::{Normalizer, TrainPhase},
};
use graph_fm_rs::test_utils::tensor_from_f32_vec;
use graph_fm_rs::ModelConfig;

type TestBackend = NdArray<f32>;

fn context(seed: u64) -> DeterministicRngContext<TestBackend> {
    DeterministicRngContext::new(seed, Default::default())
}

#[test]
fn test_top_k_keeps_exactly_k_without_ties() {
    let device = Default::default();
    let scores: Tensor<TestBackend, 2> = tensor_from_f32_vec(
        &[0.1, 0.9, 0.3, 0.8, 0.5, 0.7, 0.2, 0.6, 0.4, 0.05],
        &[2, 5],
        &device,
    );
    let kept: Vec<f32> = top_k_filter(scores, 3).into_data().to_vec().unwrap();

    assert_eq!(&kept[0..5], &[0.0, 0.9, 0.3, 0.8, 0.0]);
    assert_eq!(&kept[5..10], &[0.7, 0.0, 0.6, 0.4, 0.0]);
}

#[test]
fn test_top_k_keeps_all_ties_at_threshold() {
    let device = Default::default();
    let scores: Tensor<TestBackend, 2> =
        tensor_from_f32_vec(&[0.9, 0.5, 0.5, 0.5, 0.1], &[1, 5], &device);
    let kept: Vec<f32> = top_k_filter(scores, 2).into_data().to_vec().unwrap();

    let nonzero = kept.iter().filter(|&&v| v != 0.0).count();
    assert_eq!(nonzero, 4, "all three scores tied at the cutoff must survive: {:?}", kept);
    assert_eq!(kept[4], 0.0);
}

#[test]
#[should_panic(expected = "SHAPE ERROR")]
fn test_top_k_rejects_budget_above_field_count() {
    let device = Default::default();
    let scores: Tensor<TestBackend, 2> = tensor_from_f32_vec(&[0.1, 0.2], &[1, 2], &device);
    let _ = top_k_filter(scores, 3);
}

#[test]
fn test_attention_weights_sum_to_one_over_fields() {
    let ctx = context(21);
    let (batch, fields, dim, heads) = (3, 6, 8, 2);
    let shared = SharedBlockWeights::new(dim, heads, &ctx, 900);
    let block = MultiHeadAttentionBlock::new(dim, 8, heads, true, &ctx, 0);

    let values = ctx.generate_normal_tensor([batch, fields, dim], &mut ctx.rng_at(5), 0.0, 1.0);
    let (weights, selection) = block.attend(&shared, values, 2);
    assert_eq!(weights.dims(), [batch, fields, heads]);
    assert_eq!(selection.dims(), [batch, fields]);

    let sums: Vec<f32> = weights.sum_dim(1).into_data().to_vec().unwrap();
    assert_eq!(sums.len(), batch * heads);
    for sum in sums {
        assert!((sum - 1.0).abs() < 1e-5, "attention weights sum to {}", sum);
    }
}

#[test]
fn test_masked_fields_keep_nonzero_weight() {
    // masked logits enter the softmax as 0, not -inf
    let ctx = context(22);
    let shared = SharedBlockWeights::new(4, 1, &ctx, 900);
    let block = MultiHeadAttentionBlock::new(4, 4, 1, false, &ctx, 0);

    let values = ctx.generate_normal_tensor([1, 5, 4], &mut ctx.rng_at(6), 0.0, 1.0);
    let (weights, _) = block.attend(&shared, values, 1);
    let weights: Vec<f32> = weights.into_data().to_vec().unwrap();
    assert!(weights.iter().all(|&w| w > 0.0), "{:?}", weights);
}

/// Softmax over the field axis of `gate[b, f] * logits[b, f, h]`, computed
/// on the host. Layout matches `attend`: [batch, fields, heads].
fn gated_softmax(logits: &[f32], gate: &[f32], batch: usize, fields: usize, heads: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; batch * fields * heads];
    for b in 0..batch {
        for h in 0..heads {
            let at = |f: usize| (b * fields + f) * heads + h;
            let gated: Vec<f32> = (0..fields).map(|f| logits[at(f)] * gate[b * fields + f]).collect();
            let max = gated.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let exps: Vec<f32> = gated.iter().map(|z| (z - max).exp()).collect();
            let total: f32 = exps.iter().sum();
            for f in 0..fields {
                out[at(f)] = exps[f] / total;
            }
        }
    }
    out
}

#[test]
fn test_selected_scores_gate_head_logits() {
    let ctx = context(25);
    let (batch, fields, dim, heads, k) = (2, 5, 6, 2, 3);
    let shared = SharedBlockWeights::new(dim, heads, &ctx, 900);
    let block = MultiHeadAttentionBlock::new(dim, 4, heads, false, &ctx, 0);
    let values = ctx.generate_normal_tensor([batch, fields, dim], &mut ctx.rng_at(9), 0.0, 1.0);

    let (weights, selection) = block.attend(&shared, values.clone(), k);
    let weights: Vec<f32> = weights.into_data().to_vec().unwrap();
    let selection: Vec<f32> = selection.into_data().to_vec().unwrap();

    let logits: Vec<f32> = activation::relu(shared.attention_score.forward_3d(values.clone()))
        .into_data()
        .to_vec()
        .unwrap();
    let scores: Vec<f32> = top_k_filter(shared.selector.relevance(values), k)
        .into_data()
        .to_vec()
        .unwrap();
    assert_eq!(selection, scores);

    let expected = gated_softmax(&logits, &scores, batch, fields, heads);
    for (i, (w, e)) in weights.iter().zip(&expected).enumerate() {
        assert!((w - e).abs() < 1e-5, "weight {}: {} vs {}", i, w, e);
    }

    // a 0/1 gate gives different weights, since kept scores lie in (0, 1)
    let flags: Vec<f32> = scores.iter().map(|&s| if s > 0.0 { 1.0 } else { 0.0 }).collect();
    let flagged = gated_softmax(&logits, &flags, batch, fields, heads);
    let gap = weights
        .iter()
        .zip(&flagged)
        .map(|(w, f)| (w - f).abs())
        .fold(0.0f32, f32::max);
    assert!(gap > 1e-4, "score gating and flag gating agree: gap {}", gap);
}

#[test]
fn test_block_layer_shares_scoring_weights_across_fields() {
    let ctx = context(26);
    let (dim, units, heads) = (8, 8, 2);
    let config_for = |fields: usize| {
        let mut config = ModelConfig::new(fields, 50);
        config.embedding_size = dim;
        config.block_shape = vec![units, units];
        config.heads = heads;
        config.ks = vec![2, 1];
        config
    };

    let shared = SharedBlockWeights::new(dim, heads, &ctx, 900).num_params();
    // scorer dim*heads + heads, selector (dim*16 + 16) + (16 + 1)
    assert_eq!(shared, dim * heads + heads + dim * 16 + 16 + 16 + 1);

    let per_field = MultiHeadAttentionBlock::new(dim, units, heads, true, &ctx, 0).num_params();
    // value projection has no bias, residual has one
    let normalizer = Normalizer::new(units, &ctx).num_params();
    assert_eq!(per_field, dim * units + (dim * units + units) + normalizer);

    for fields in [4, 7] {
        let layer = BlockLayer::new(&config_for(fields), 0, &ctx);
        assert_eq!(layer.num_params(), shared + fields * per_field, "{} fields", fields);
    }
}

#[test]
fn test_attention_block_output_shapes() {
    let ctx = context(23);
    let shared = SharedBlockWeights::new(8, 2, &ctx, 900);
    let block = MultiHeadAttentionBlock::new(8, 6, 2, true, &ctx, 0);

    let h = ctx.generate_normal_tensor([2, 5, 8], &mut ctx.rng_at(7), 0.0, 1.0);
    let query = h.clone().narrow(1, 0, 1);
    let values = query.clone().repeat_dim(1, 5) * h;

    let output = block.forward(&shared, query, values, 3, 1.0, &mut TrainPhase::Eval);
    assert_eq!(output.state.dims(), [2, 1, 6]);
    assert_eq!(output.visibility.dims(), [2, 1, 5]);
}

#[test]
fn test_normalizer_output_moments() {
    let ctx = context(24);
    let normalizer = Normalizer::new(16, &ctx);
    let x = ctx.generate_normal_tensor([4, 3, 16], &mut ctx.rng_at(8), 2.0, 3.0);

    let out = normalizer.forward(x);
    let mean: Vec<f32> = out.clone().mean_dim(2).into_data().to_vec().unwrap();
    let var: Vec<f32> = out.var_bias(2).into_data().to_vec().unwrap();

    for m in mean {
        assert!(m.abs() < 1e-4, "mean {} should be ~0", m);
    }
    for v in var {
        assert!((v - 1.0).abs() < 1e-3, "variance {} should be ~1", v);
    }
}
