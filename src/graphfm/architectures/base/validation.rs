//! Host-side evaluation metrics.

use serde::{Deserialize, Serialize};

/// Predictions are clipped into [PROBABILITY_CLIP, 1 - PROBABILITY_CLIP]
/// before any metric is computed.
pub const PROBABILITY_CLIP: f32 = 1e-6;

/// Metrics of one evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub auc: f64,
    pub log_loss: f64,
}

pub fn clip_probabilities(predictions: &[f32]) -> Vec<f32> {
    predictions
        .iter()
        .map(|p| p.clamp(PROBABILITY_CLIP, 1.0 - PROBABILITY_CLIP))
        .collect()
}

/// Area under the ROC curve (Mann-Whitney U with average ranks for ties).
///
/// Returns 0.5 when only one class is present.
pub fn roc_auc(labels: &[f32], scores: &[f32]) -> f64 {
    assert_eq!(labels.len(), scores.len(), "labels and scores must have equal length");

    let positives = labels.iter().filter(|&&y| y > 0.5).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        log::warn!(
            "AUC is undefined for a single-class batch ({} positives, {} negatives); reporting 0.5",
            positives,
            negatives
        );
        return 0.5;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    // 1-based ranks, tied scores share the mean rank of their run
    let mut ranks = vec![0.0f64; scores.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        let mean_rank = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = mean_rank;
        }
        start = end;
    }

    let positive_rank_sum: f64 = labels
        .iter()
        .zip(&ranks)
        .filter(|(y, _)| **y > 0.5)
        .map(|(_, r)| *r)
        .sum();
    let (p, n) = (positives as f64, negatives as f64);
    (positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n)
}

/// Mean binary cross-entropy of already-clipped probabilities.
pub fn log_loss(labels: &[f32], predictions: &[f32]) -> f64 {
    assert_eq!(labels.len(), predictions.len(), "labels and predictions must have equal length");
    if labels.is_empty() {
        return 0.0;
    }

    let total: f64 = labels
        .iter()
        .zip(predictions)
        .map(|(&y, &p)| {
            let (y, p) = (y as f64, p as f64);
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum();
    total / labels.len() as f64
}

/// Clips `predictions` and computes AUC and log-loss against `labels`.
pub fn evaluate_predictions(labels: &[f32], predictions: &[f32]) -> Result<EvaluationMetrics, String> {
    if labels.is_empty() {
        return Err("cannot evaluate an empty dataset".to_string());
    }
    if labels.len() != predictions.len() {
        return Err(format!(
            "{} labels but {} predictions",
            labels.len(),
            predictions.len()
        ));
    }

    let clipped = clip_probabilities(predictions);
    Ok(EvaluationMetrics {
        auc: roc_auc(labels, &clipped),
        log_loss: log_loss(labels, &clipped),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_and_inverted_ranking() {
        let labels = [0.0, 0.0, 1.0, 1.0];
        assert_eq!(roc_auc(&labels, &[0.1, 0.2, 0.8, 0.9]), 1.0);
        assert_eq!(roc_auc(&labels, &[0.9, 0.8, 0.2, 0.1]), 0.0);
    }

    #[test]
    fn test_ties_count_half() {
        // one positive tied with one negative, the other pair correctly ordered
        let auc = roc_auc(&[0.0, 1.0, 0.0, 1.0], &[0.5, 0.5, 0.1, 0.9]);
        assert!((auc - 0.875).abs() < 1e-12);
    }

    #[test]
    fn test_log_loss_of_clipped_certainty_is_finite() {
        let metrics = evaluate_predictions(&[1.0, 0.0], &[1.0, 0.0]).unwrap();
        assert!(metrics.log_loss.is_finite());
        assert!(metrics.log_loss < 1e-5);
        assert_eq!(metrics.auc, 1.0);
    }

    #[test]
    fn test_empty_evaluation_is_an_error() {
        assert!(evaluate_predictions(&[], &[]).is_err());
    }
}
