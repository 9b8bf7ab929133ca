// Test utilities for backend-aware tensor construction and small fixtures.
//
// Tensor helpers go through Vec<T> + .as_slice() to satisfy Burn's
// Into<TensorData> bounds for any rank.

use burn::tensor::{backend::Backend, Int, Shape, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::graphfm::architectures::base::{config::ModelConfig, data::CtrDataset};

/// Create f32 tensor from data slice with specified shape
pub fn tensor_from_f32_vec<B: Backend, const D: usize>(
    data: &[f32],
    shape: &[usize],
    device: &B::Device,
) -> Tensor<B, D> {
    let expected_size: usize = shape.iter().product();
    assert_eq!(
        data.len(),
        expected_size,
        "Data length {} doesn't match shape {:?} (expected {})",
        data.len(),
        shape,
        expected_size
    );

    let data_vec: Vec<f32> = data.to_vec();
    Tensor::<B, 1>::from_floats(data_vec.as_slice(), device).reshape(Shape::from(shape))
}

/// Create i64 tensor from data slice with specified shape
pub fn tensor_from_i64_vec<B: Backend, const D: usize>(
    data: &[i64],
    shape: &[usize],
    device: &B::Device,
) -> Tensor<B, D, Int> {
    let expected_size: usize = shape.iter().product();
    assert_eq!(
        data.len(),
        expected_size,
        "Data length {} doesn't match shape {:?} (expected {})",
        data.len(),
        shape,
        expected_size
    );

    let data_vec: Vec<i64> = data.to_vec();
    Tensor::<B, 1, Int>::from_ints(data_vec.as_slice(), device).reshape(Shape::from(shape))
}

/// The reference scenario: 10 fields, 8-dim embeddings, two 8-wide blocks with
/// 2 heads and top-k budgets [5, 3].
pub fn scenario_config(feature_size: usize) -> ModelConfig {
    let mut config = ModelConfig::new(10, feature_size);
    config.embedding_size = 8;
    config.blocks = 2;
    config.heads = 2;
    config.block_shape = vec![8, 8];
    config.ks = vec![5, 3];
    config
}

/// `rows` samples with uniform random indices in `[0, feature_size)`, all
/// values 1.0 and alternating labels.
pub fn random_dataset(config: &ModelConfig, rows: usize, seed: u64) -> CtrDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let width = config.single_value_fields();

    let feature_index = (0..rows)
        .map(|_| (0..width).map(|_| rng.random_range(0..config.feature_size)).collect())
        .collect();
    let feature_value = vec![vec![1.0f32; width]; rows];
    let labels = (0..rows).map(|i| (i % 2) as f32).collect();

    CtrDataset {
        feature_index,
        feature_value,
        labels,
        multi_value: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_tensor_from_f32_vec_2d() {
        let device = Default::default();
        let tensor: Tensor<TestBackend, 2> = tensor_from_f32_vec(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], &device);
        assert_eq!(tensor.dims(), [2, 3]);
    }

    #[test]
    #[should_panic(expected = "doesn't match shape")]
    fn test_tensor_from_i64_vec_rejects_bad_shape() {
        let device = Default::default();
        let _: Tensor<TestBackend, 2, Int> = tensor_from_i64_vec(&[1, 2, 3], &[2, 2], &device);
    }

    #[test]
    fn test_random_dataset_fits_scenario() {
        let config = scenario_config(100);
        let data = random_dataset(&config, 4, 1);
        assert_eq!(data.len(), 4);
        assert!(data.validate(&config).is_ok());
    }
}
