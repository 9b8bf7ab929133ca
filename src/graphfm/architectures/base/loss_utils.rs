use burn::tensor::{backend::Backend, ElementConversion, Tensor};

use super::config::LossType;

/// Epsilon inside the logarithms of the binary log-loss.
pub const LOG_LOSS_EPSILON: f64 = 1e-7;

/// Mean binary cross-entropy of probabilities `pred` against `labels`, both [batch, 1].
pub fn binary_log_loss<B: Backend>(pred: Tensor<B, 2>, labels: Tensor<B, 2>) -> Tensor<B, 1> {
    let positive = labels.clone() * pred.clone().add_scalar(LOG_LOSS_EPSILON).log();
    let negative = labels.neg().add_scalar(1.0) * pred.neg().add_scalar(1.0 + LOG_LOSS_EPSILON).log();
    (positive + negative).neg().mean()
}

/// Mean `log(cosh(pred - label))`.
///
/// Inputs are probabilities and labels in [0, 1], so the difference is
/// bounded and the direct form does not overflow.
pub fn log_cosh_loss<B: Backend>(pred: Tensor<B, 2>, labels: Tensor<B, 2>) -> Tensor<B, 1> {
    let diff = pred - labels;
    let cosh = (diff.clone().exp() + diff.neg().exp()).div_scalar(2.0);
    cosh.log().mean()
}

/// `½ Σ (label - pred)²` over the batch.
pub fn squared_error_loss<B: Backend>(pred: Tensor<B, 2>, labels: Tensor<B, 2>) -> Tensor<B, 1> {
    (labels - pred).powf_scalar(2.0).sum().div_scalar(2.0)
}

/// Dispatches to the loss selected by `loss_type`.
///
/// `pred` must already be sigmoid-squashed for the probability losses.
pub fn compute_loss<B: Backend>(loss_type: LossType, pred: Tensor<B, 2>, labels: Tensor<B, 2>) -> Tensor<B, 1> {
    let pred_dims = pred.dims();
    let label_dims = labels.dims();
    if pred_dims != label_dims {
        panic!(
            "SHAPE ERROR: predictions {:?} and labels {:?} must have the same shape",
            pred_dims, label_dims
        );
    }

    match loss_type {
        LossType::Logloss => binary_log_loss(pred, labels),
        LossType::Logcosh => log_cosh_loss(pred, labels),
        LossType::Mse => squared_error_loss(pred, labels),
    }
}

/// Reads a scalar loss back to the host and panics if it is not finite.
///
/// Returns the value for logging.
pub fn validate_loss_value<B: Backend>(loss: &Tensor<B, 1>, iteration: usize) -> f32 {
    let value: f32 = loss.clone().into_scalar().elem();

    if value.is_nan() {
        panic!(
            "LOSS ERROR: loss is NaN at step {}. Check the learning rate and input values.",
            iteration
        );
    }
    if value.is_infinite() {
        panic!(
            "LOSS ERROR: loss is infinite ({}) at step {}. Check the learning rate and label range.",
            value, iteration
        );
    }
    if value < 0.0 {
        log::warn!("loss {} at step {} is negative", value, iteration);
    }

    value
}
