use burn::tensor::{backend::Backend, Int, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use super::config::ModelConfig;
use super::encoders::{FieldInputs, MultiValueInputs};

/// Index/value columns of the multi-value field, one row per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiValueField {
    pub index: Vec<Vec<usize>>,
    pub value: Vec<Vec<f32>>,
}

/// Host-side CTR samples: parallel rows of field indices, field values and labels.
#[derive(Debug, Clone, PartialEq)]
pub struct CtrDataset {
    pub feature_index: Vec<Vec<usize>>,
    pub feature_value: Vec<Vec<f32>>,
    pub labels: Vec<f32>,
    pub multi_value: Option<MultiValueField>,
}

impl CtrDataset {
    pub fn new(
        feature_index: Vec<Vec<usize>>,
        feature_value: Vec<Vec<f32>>,
        labels: Vec<f32>,
        multi_value: Option<MultiValueField>,
    ) -> Result<Self, String> {
        let dataset = Self {
            feature_index,
            feature_value,
            labels,
            multi_value,
        };
        dataset.validate_lengths()?;
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    fn validate_lengths(&self) -> Result<(), String> {
        let n = self.labels.len();
        if self.feature_index.len() != n || self.feature_value.len() != n {
            return Err(format!(
                "row count mismatch: {} index rows, {} value rows, {} labels",
                self.feature_index.len(),
                self.feature_value.len(),
                n
            ));
        }
        if let Some(multi) = &self.multi_value {
            if multi.index.len() != n || multi.value.len() != n {
                return Err(format!(
                    "multi-value row count mismatch: {} index rows, {} value rows, {} labels",
                    multi.index.len(),
                    multi.value.len(),
                    n
                ));
            }
        }
        Ok(())
    }

    /// Checks widths, index bounds and multi-value weights against `config`.
    pub fn validate(&self, config: &ModelConfig) -> Result<(), String> {
        self.validate_lengths()?;
        let width = config.single_value_fields();

        for (row, (index, value)) in self.feature_index.iter().zip(&self.feature_value).enumerate() {
            if index.len() != width || value.len() != width {
                return Err(format!(
                    "row {}: expected {} single-value fields, got {} indices and {} values",
                    row,
                    width,
                    index.len(),
                    value.len()
                ));
            }
            if let Some(&bad) = index.iter().find(|&&i| i >= config.feature_size) {
                return Err(format!(
                    "row {}: feature index {} outside [0, {})",
                    row, bad, config.feature_size
                ));
            }
        }

        match (&self.multi_value, config.multi_value_field) {
            (None, None) => Ok(()),
            (Some(_), None) => Err("dataset carries a multi-value field the model does not expect".to_string()),
            (None, Some(_)) => Err("model expects a multi-value field the dataset does not carry".to_string()),
            (Some(multi), Some(multi_width)) => {
                for (row, (index, value)) in multi.index.iter().zip(&multi.value).enumerate() {
                    if index.len() != multi_width || value.len() != multi_width {
                        return Err(format!(
                            "row {}: multi-value field must have width {}",
                            row, multi_width
                        ));
                    }
                    if let Some(&bad) = index.iter().find(|&&i| i >= config.feature_size) {
                        return Err(format!(
                            "row {}: multi-value index {} outside [0, {})",
                            row, bad, config.feature_size
                        ));
                    }
                    if value.iter().sum::<f32>() == 0.0 {
                        return Err(format!("row {}: multi-value weights sum to zero", row));
                    }
                }
                Ok(())
            }
        }
    }

    /// Rows `[index * batch_size, min((index + 1) * batch_size, len))`.
    pub fn get_batch(&self, batch_size: usize, index: usize) -> CtrDataset {
        let start = (index * batch_size).min(self.len());
        let end = ((index + 1) * batch_size).min(self.len());

        CtrDataset {
            feature_index: self.feature_index[start..end].to_vec(),
            feature_value: self.feature_value[start..end].to_vec(),
            labels: self.labels[start..end].to_vec(),
            multi_value: self.multi_value.as_ref().map(|multi| MultiValueField {
                index: multi.index[start..end].to_vec(),
                value: multi.value[start..end].to_vec(),
            }),
        }
    }

    /// Consecutive batches covering every row; the last one may be short.
    pub fn batches(&self, batch_size: usize) -> impl Iterator<Item = CtrDataset> + '_ {
        let count = self.len().div_ceil(batch_size.max(1));
        (0..count).map(move |i| self.get_batch(batch_size, i))
    }

    /// Applies one random permutation to every column.
    pub fn shuffle_in_unison(&mut self, rng: &mut StdRng) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);

        self.feature_index = permute(&self.feature_index, &order);
        self.feature_value = permute(&self.feature_value, &order);
        self.labels = permute(&self.labels, &order);
        if let Some(multi) = &mut self.multi_value {
            multi.index = permute(&multi.index, &order);
            multi.value = permute(&multi.value, &order);
        }
    }

    pub fn to_inputs<B: Backend>(&self, device: &B::Device) -> FieldInputs<B> {
        FieldInputs {
            feature_index: index_tensor(&self.feature_index, device),
            feature_value: value_tensor(&self.feature_value, device),
            multi_value: self.multi_value.as_ref().map(|multi| MultiValueInputs {
                index: index_tensor(&multi.index, device),
                value: value_tensor(&multi.value, device),
            }),
        }
    }

    /// Labels as a [len, 1] column.
    pub fn label_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        Tensor::<B, 1>::from_floats(self.labels.as_slice(), device).reshape([self.len(), 1])
    }
}

fn permute<T: Clone>(rows: &[T], order: &[usize]) -> Vec<T> {
    order.iter().map(|&i| rows[i].clone()).collect()
}

fn index_tensor<B: Backend>(rows: &[Vec<usize>], device: &B::Device) -> Tensor<B, 2, Int> {
    let width = rows.first().map_or(0, Vec::len);
    let flat: Vec<i64> = rows.iter().flatten().map(|&i| i as i64).collect();
    Tensor::<B, 1, Int>::from_ints(flat.as_slice(), device).reshape([rows.len(), width])
}

fn value_tensor<B: Backend>(rows: &[Vec<f32>], device: &B::Device) -> Tensor<B, 2> {
    let width = rows.first().map_or(0, Vec::len);
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Tensor::<B, 1>::from_floats(flat.as_slice(), device).reshape([rows.len(), width])
}

/// Generator of CTR-like samples with known pairwise structure.
///
/// Each single-value field owns `vocab_per_field` consecutive indices; the
/// multi-value field, when enabled, draws from a trailing pool of
/// `multi_value_vocab` indices. Labels are Bernoulli(sigmoid(z)) where z sums
/// hidden first-order weights and factorised pairwise interactions of the
/// active features.
#[derive(Debug, Clone)]
pub struct SyntheticCtrPrior {
    pub single_value_fields: usize,
    pub vocab_per_field: usize,
    pub multi_value_width: Option<usize>,
    pub multi_value_vocab: usize,
    pub factor_dim: usize,
    pub interaction_scale: f32,
}

impl SyntheticCtrPrior {
    /// Prior matching the field layout of `config`.
    pub fn for_config(config: &ModelConfig) -> Self {
        let multi_value_vocab = config.multi_value_field.map_or(0, |width| width * 3);
        let single = config.single_value_fields();
        Self {
            single_value_fields: single,
            vocab_per_field: ((config.feature_size - multi_value_vocab) / single.max(1)).max(1),
            multi_value_width: config.multi_value_field,
            multi_value_vocab,
            factor_dim: 4,
            interaction_scale: 1.0,
        }
    }

    pub fn feature_size(&self) -> usize {
        self.single_value_fields * self.vocab_per_field + self.multi_value_vocab
    }

    pub fn sample(&self, num_samples: usize, seed: u64) -> CtrDataset {
        let mut rng = StdRng::seed_from_u64(seed);
        let feature_size = self.feature_size();

        let first_order = Normal::new(0.0f32, 0.5).map_or_else(
            |_| vec![0.0; feature_size],
            |normal| (0..feature_size).map(|_| normal.sample(&mut rng)).collect(),
        );
        let factor_std = self.interaction_scale / (self.factor_dim as f32).sqrt();
        let factors: Vec<Vec<f32>> = match Normal::new(0.0f32, factor_std) {
            Ok(normal) => (0..feature_size)
                .map(|_| (0..self.factor_dim).map(|_| normal.sample(&mut rng)).collect())
                .collect(),
            Err(_) => vec![vec![0.0; self.factor_dim]; feature_size],
        };

        let mut feature_index = Vec::with_capacity(num_samples);
        let mut feature_value = Vec::with_capacity(num_samples);
        let mut labels = Vec::with_capacity(num_samples);
        let mut multi = self.multi_value_width.map(|_| MultiValueField {
            index: Vec::with_capacity(num_samples),
            value: Vec::with_capacity(num_samples),
        });

        for _ in 0..num_samples {
            let index: Vec<usize> = (0..self.single_value_fields)
                .map(|field| field * self.vocab_per_field + rng.random_range(0..self.vocab_per_field))
                .collect();
            let value = vec![1.0f32; index.len()];

            // active (index, value) pairs that drive the label
            let mut active: Vec<(usize, f32)> = index.iter().map(|&i| (i, 1.0)).collect();

            if let (Some(width), Some(multi)) = (self.multi_value_width, multi.as_mut()) {
                let pool_start = self.single_value_fields * self.vocab_per_field;
                let mut pool: Vec<usize> = (pool_start..pool_start + self.multi_value_vocab).collect();
                pool.shuffle(&mut rng);
                let used = rng.random_range(1..=width);

                let sub_index: Vec<usize> = (0..width)
                    .map(|slot| if slot < used { pool[slot] } else { pool_start })
                    .collect();
                let sub_value: Vec<f32> = (0..width).map(|slot| if slot < used { 1.0 } else { 0.0 }).collect();

                let weight = 1.0 / used as f32;
                active.extend(sub_index.iter().take(used).map(|&i| (i, weight)));
                multi.index.push(sub_index);
                multi.value.push(sub_value);
            }

            let mut logit: f32 = active.iter().map(|&(i, x)| first_order[i] * x).sum();
            for a in 0..active.len() {
                for b in (a + 1)..active.len() {
                    let (ia, xa) = active[a];
                    let (ib, xb) = active[b];
                    let dot: f32 = factors[ia].iter().zip(&factors[ib]).map(|(p, q)| p * q).sum();
                    logit += dot * xa * xb;
                }
            }

            let probability = 1.0 / (1.0 + (-logit).exp());
            labels.push(if rng.random::<f32>() < probability { 1.0 } else { 0.0 });
            feature_index.push(index);
            feature_value.push(value);
        }

        log::debug!(
            "sampled {} synthetic rows over {} features ({} positive)",
            num_samples,
            feature_size,
            labels.iter().filter(|&&y| y > 0.5).count()
        );

        CtrDataset {
            feature_index,
            feature_value,
            labels,
            multi_value: multi,
        }
    }
}
