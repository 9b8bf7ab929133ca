use burn::{
    module::{Module, Param, RunningState},
    nn::LayerNorm as BurnLayerNorm,
    tensor::{backend::Backend, Tensor},
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::deterministic::DeterministicRngContext;

/// Epsilon of the block-output layer normalisation.
pub const NORMALIZER_EPSILON: f64 = 1e-8;

/// Epsilon of the deep-branch batch normalisation.
pub const BATCH_NORM_EPSILON: f64 = 1e-3;

/// Run mode of one forward pass.
///
/// `Train` owns the RNG the dropout masks are drawn from; `Eval` disables
/// dropout and makes batch normalisation read its running statistics.
#[derive(Debug)]
pub enum TrainPhase {
    Train(StdRng),
    Eval,
}

impl TrainPhase {
    pub fn train(seed: u64) -> Self {
        Self::Train(StdRng::seed_from_u64(seed))
    }

    pub fn is_train(&self) -> bool {
        matches!(self, Self::Train(_))
    }

    /// Inverted dropout: zeroes entries with probability `1 - keep_prob` and
    /// rescales survivors by `1 / keep_prob`. Identity in eval mode.
    pub fn dropout<B: Backend, const D: usize>(&mut self, x: Tensor<B, D>, keep_prob: f64) -> Tensor<B, D> {
        let rng = match self {
            Self::Train(rng) if keep_prob < 1.0 => rng,
            _ => return x,
        };

        let shape = x.shape();
        let scale = (1.0 / keep_prob) as f32;
        let mask: Vec<f32> = (0..shape.num_elements())
            .map(|_| if rng.random::<f64>() < keep_prob { scale } else { 0.0 })
            .collect();
        let mask = Tensor::<B, 1>::from_floats(mask.as_slice(), &x.device()).reshape(shape);
        x * mask
    }
}

/// Layer normalisation over the last axis with learned gamma/beta.
#[derive(Module, Debug)]
pub struct Normalizer<B: Backend> {
    layer_norm: BurnLayerNorm<B>,
}

impl<B: Backend> Normalizer<B> {
    pub fn new(d_model: usize, rng_ctx: &DeterministicRngContext<B>) -> Self {
        Self {
            layer_norm: rng_ctx.create_deterministic_layer_norm(d_model, NORMALIZER_EPSILON),
        }
    }

    /// `(x - mean) / sqrt(var + eps) * gamma + beta` over the last axis.
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        self.layer_norm.forward(x)
    }
}

/// Batch normalisation over the batch axis of a [batch, channels] tensor.
///
/// The running statistics are updated only in train mode, as
/// `running = decay * running + (1 - decay) * batch`.
#[derive(Module, Debug)]
pub struct DenseBatchNorm<B: Backend> {
    gamma: Param<Tensor<B, 1>>,
    beta: Param<Tensor<B, 1>>,
    running_mean: RunningState<Tensor<B, 1>>,
    running_var: RunningState<Tensor<B, 1>>,
    decay: f64,
}

impl<B: Backend> DenseBatchNorm<B> {
    pub fn new(channels: usize, decay: f64, device: &B::Device) -> Self {
        Self {
            gamma: Param::from_tensor(Tensor::ones([channels], device)),
            beta: Param::from_tensor(Tensor::zeros([channels], device)),
            running_mean: RunningState::new(Tensor::zeros([channels], device)),
            running_var: RunningState::new(Tensor::ones([channels], device)),
            decay,
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>, phase: &TrainPhase) -> Tensor<B, 2> {
        let [_, channels] = x.dims();

        let (mean, var) = if phase.is_train() {
            let mean = x.clone().mean_dim(0);
            let var = (x.clone() - mean.clone()).powf_scalar(2.0).mean_dim(0);

            let batch_mean = mean.clone().detach().reshape([channels]);
            let batch_var = var.clone().detach().reshape([channels]);
            // value_sync folds the previous step's pending update in first
            self.running_mean.update(
                self.running_mean.value_sync().mul_scalar(self.decay) + batch_mean.mul_scalar(1.0 - self.decay),
            );
            self.running_var.update(
                self.running_var.value_sync().mul_scalar(self.decay) + batch_var.mul_scalar(1.0 - self.decay),
            );
            (mean, var)
        } else {
            (
                self.running_mean.value_sync().reshape([1, channels]),
                self.running_var.value_sync().reshape([1, channels]),
            )
        };

        let normalized = (x - mean) / var.add_scalar(BATCH_NORM_EPSILON).sqrt();
        normalized * self.gamma.val().reshape([1, channels]) + self.beta.val().reshape([1, channels])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_eval_dropout_is_identity() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::ones([3, 5], &device);
        let mut phase = TrainPhase::Eval;
        let out: Vec<f32> = phase.dropout(x, 0.5).into_data().to_vec().unwrap();
        assert!(out.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_train_dropout_scales_survivors() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::ones([8, 16], &device);
        let mut phase = TrainPhase::train(3);
        let out: Vec<f32> = phase.dropout(x, 0.5).into_data().to_vec().unwrap();
        assert!(out.iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-6));
        assert!(out.iter().any(|&v| v == 0.0));
        assert!(out.iter().any(|&v| v > 0.0));
    }

    #[test]
    fn test_batch_norm_train_then_eval() {
        let device = Default::default();
        let bn = DenseBatchNorm::<TestBackend>::new(2, 0.5, &device);
        let x = Tensor::<TestBackend, 1>::from_floats([1.0, 10.0, 3.0, 10.0].as_slice(), &device)
            .reshape([2, 2]);

        let out: Vec<f32> = bn.forward(x.clone(), &TrainPhase::train(0)).into_data().to_vec().unwrap();
        // channel 0 normalises to -1/+1 (up to epsilon), channel 1 is constant
        assert!((out[0] + 1.0).abs() < 1e-2 && (out[2] - 1.0).abs() < 1e-2);
        assert!(out[1].abs() < 1e-6 && out[3].abs() < 1e-6);

        // running mean moved halfway towards the batch mean [2, 10]
        let running: Vec<f32> = bn.running_mean.value_sync().into_data().to_vec().unwrap();
        assert!((running[0] - 1.0).abs() < 1e-6);
        assert!((running[1] - 5.0).abs() < 1e-6);

        let eval: Vec<f32> = bn.forward(x, &TrainPhase::Eval).into_data().to_vec().unwrap();
        assert_eq!(eval.len(), 4);
        assert!(eval.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_batch_norm_running_mean_is_one_moving_average() {
        let device = Default::default();
        let bn = DenseBatchNorm::<TestBackend>::new(1, 0.5, &device);

        // batch means 2, 4, 8 with no read of the statistics in between
        for rows in [[1.0, 3.0], [3.0, 5.0], [7.0, 9.0]] {
            let x = Tensor::<TestBackend, 1>::from_floats(rows.as_slice(), &device).reshape([2, 1]);
            let _ = bn.forward(x, &TrainPhase::train(0));
        }

        // 0 -> 1 -> 2.5 -> 5.25
        let running: Vec<f32> = bn.running_mean.value_sync().into_data().to_vec().unwrap();
        assert!((running[0] - 5.25).abs() < 1e-5, "running mean {}", running[0]);
        let running_var: Vec<f32> = bn.running_var.value_sync().into_data().to_vec().unwrap();
        assert!((running_var[0] - 1.0).abs() < 1e-5, "running var {}", running_var[0]);

        // eval normalises with the running statistics: (5.25 - 5.25) / sqrt(1 + eps) = 0
        let centred = Tensor::<TestBackend, 1>::from_floats([5.25].as_slice(), &device).reshape([1, 1]);
        let eval: Vec<f32> = bn.forward(centred, &TrainPhase::Eval).into_data().to_vec().unwrap();
        assert!(eval[0].abs() < 1e-5, "eval output {}", eval[0]);
    }
}
