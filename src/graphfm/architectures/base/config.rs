use serde::{Deserialize, Serialize};

/// Loss attached to the model output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossType {
    /// Binary log-loss on sigmoid probabilities
    Logloss,
    /// Log-cosh surrogate on sigmoid probabilities
    Logcosh,
    /// Half sum of squared errors on the raw output
    Mse,
}

impl Default for LossType {
    fn default() -> Self {
        Self::Logloss
    }
}

impl LossType {
    pub fn parse(name: &str) -> Result<Self, String> {
        match name {
            "logloss" => Ok(Self::Logloss),
            "logcosh" => Ok(Self::Logcosh),
            "mse" => Ok(Self::Mse),
            other => Err(format!("unknown loss_type '{}', expected logloss|logcosh|mse", other)),
        }
    }

    /// Whether the model output is squashed through a sigmoid before the loss.
    pub fn applies_sigmoid(&self) -> bool {
        !matches!(self, Self::Mse)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerType {
    Adam,
    Adagrad,
    Gd,
    Momentum,
}

impl Default for OptimizerType {
    fn default() -> Self {
        Self::Adam
    }
}

impl OptimizerType {
    pub fn parse(name: &str) -> Result<Self, String> {
        match name {
            "adam" => Ok(Self::Adam),
            "adagrad" => Ok(Self::Adagrad),
            "gd" => Ok(Self::Gd),
            "momentum" => Ok(Self::Momentum),
            other => Err(format!(
                "unknown optimizer_type '{}', expected adam|adagrad|gd|momentum",
                other
            )),
        }
    }
}

/// Configuration for the GraphFM architecture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of fields per sample, the multi-value field included
    pub field_size: usize,

    /// Size of the shared embedding table
    pub feature_size: usize,

    /// Top-k neighbour budget per block layer
    pub ks: Vec<usize>,

    #[serde(default = "default_embedding_size")]
    pub embedding_size: usize,

    /// Number of stacked block layers
    #[serde(default = "default_blocks")]
    pub blocks: usize,

    /// Attention heads per block
    #[serde(default = "default_heads")]
    pub heads: usize,

    /// Output width of every block layer
    #[serde(default = "default_block_shape")]
    pub block_shape: Vec<usize>,

    #[serde(default = "default_true")]
    pub has_residual: bool,

    /// Hidden widths of the deep side branch; `None` disables it
    #[serde(default)]
    pub deep_layers: Option<Vec<usize>>,

    #[serde(default)]
    pub batch_norm: bool,

    #[serde(default = "default_batch_norm_decay")]
    pub batch_norm_decay: f64,

    /// Keep probabilities for [attention weights, embeddings, deep layers]
    #[serde(default = "default_dropout_keep_prob")]
    pub dropout_keep_prob: [f64; 3],

    #[serde(default)]
    pub l2_reg: f64,

    #[serde(default)]
    pub loss_type: LossType,

    /// Width of the multi-value field (e.g. 6 genre slots). When set, the
    /// aggregated field is appended after the `field_size - 1` single-value fields.
    #[serde(default)]
    pub multi_value_field: Option<usize>,

    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_embedding_size() -> usize {
    16
}
fn default_blocks() -> usize {
    2
}
fn default_heads() -> usize {
    2
}
fn default_block_shape() -> Vec<usize> {
    vec![16, 16]
}
fn default_true() -> bool {
    true
}
fn default_batch_norm_decay() -> f64 {
    0.995
}
fn default_dropout_keep_prob() -> [f64; 3] {
    [1.0, 1.0, 1.0]
}
fn default_seed() -> u64 {
    42
}

impl ModelConfig {
    /// Config with default architecture for the given field and vocabulary sizes.
    ///
    /// The top-k budget starts at every field for the first layer and halves
    /// for the second.
    pub fn new(field_size: usize, feature_size: usize) -> Self {
        Self {
            field_size,
            feature_size,
            ks: vec![field_size, (field_size / 2).max(1)],
            embedding_size: default_embedding_size(),
            blocks: default_blocks(),
            heads: default_heads(),
            block_shape: default_block_shape(),
            has_residual: true,
            deep_layers: None,
            batch_norm: false,
            batch_norm_decay: default_batch_norm_decay(),
            dropout_keep_prob: default_dropout_keep_prob(),
            l2_reg: 0.0,
            loss_type: LossType::default(),
            multi_value_field: None,
            seed: default_seed(),
        }
    }

    /// Number of single-value columns a sample carries.
    pub fn single_value_fields(&self) -> usize {
        match self.multi_value_field {
            Some(_) => self.field_size - 1,
            None => self.field_size,
        }
    }

    /// Input width of the prediction projection.
    pub fn pooled_width(&self) -> usize {
        self.block_shape.iter().sum()
    }

    /// Input width of block layer `layer`.
    pub fn block_input_width(&self, layer: usize) -> usize {
        if layer == 0 {
            self.embedding_size
        } else {
            self.block_shape[layer - 1]
        }
    }

    pub fn validate_consistent(&self) -> Result<(), String> {
        if self.field_size == 0 || self.feature_size == 0 || self.embedding_size == 0 {
            return Err("field_size, feature_size and embedding_size must be positive".to_string());
        }
        if self.blocks == 0 || self.heads == 0 {
            return Err("blocks and heads must be positive".to_string());
        }
        if self.block_shape.len() != self.blocks {
            return Err(format!(
                "block_shape has {} entries but blocks = {}",
                self.block_shape.len(),
                self.blocks
            ));
        }
        if self.ks.len() != self.blocks {
            return Err(format!("ks has {} entries but blocks = {}", self.ks.len(), self.blocks));
        }
        for (i, &k) in self.ks.iter().enumerate() {
            if k == 0 || k > self.field_size {
                return Err(format!(
                    "ks[{}] = {} must lie in [1, field_size = {}]",
                    i, k, self.field_size
                ));
            }
        }
        for (i, &units) in self.block_shape.iter().enumerate() {
            if units == 0 || units % self.heads != 0 {
                return Err(format!(
                    "block_shape[{}] = {} must be a positive multiple of heads = {}",
                    i, units, self.heads
                ));
            }
        }
        if self.dropout_keep_prob.iter().any(|&p| !(p > 0.0 && p <= 1.0)) {
            return Err(format!(
                "dropout_keep_prob {:?} must lie in (0, 1]",
                self.dropout_keep_prob
            ));
        }
        if let Some(deep) = &self.deep_layers {
            if deep.is_empty() || deep.contains(&0) {
                return Err("deep_layers must be non-empty with positive widths".to_string());
            }
        }
        if !(0.0..1.0).contains(&self.batch_norm_decay) {
            return Err(format!("batch_norm_decay {} must lie in [0, 1)", self.batch_norm_decay));
        }
        if self.l2_reg < 0.0 {
            return Err("l2_reg must be non-negative".to_string());
        }
        if let Some(width) = self.multi_value_field {
            if width == 0 {
                return Err("multi_value_field width must be positive".to_string());
            }
        }

        log::debug!(
            "ModelConfig ok: fields={} emb={} blocks={} heads={} block_shape={:?} ks={:?}",
            self.field_size,
            self.embedding_size,
            self.blocks,
            self.heads,
            self.block_shape,
            self.ks
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_config_is_consistent() {
        let config = ModelConfig::new(10, 100);
        assert!(config.validate_consistent().is_ok());
        assert_eq!(config.ks, vec![10, 5]);
        assert_eq!(config.pooled_width(), 32);
    }

    #[test]
    fn test_serde_defaults() {
        let config: ModelConfig =
            serde_json::from_str(r#"{"field_size": 4, "feature_size": 20, "ks": [2, 2]}"#).unwrap();
        assert_eq!(config.embedding_size, 16);
        assert_eq!(config.block_shape, vec![16, 16]);
        assert!(config.has_residual);
        assert_eq!(config.loss_type, LossType::Logloss);
        assert!(config.deep_layers.is_none());
    }

    #[test]
    fn test_loss_and_optimizer_names() {
        assert_eq!(LossType::parse("mse").unwrap(), LossType::Mse);
        assert!(!LossType::Mse.applies_sigmoid());
        assert!(LossType::Logcosh.applies_sigmoid());
        assert_eq!(OptimizerType::parse("momentum").unwrap(), OptimizerType::Momentum);
        assert!(OptimizerType::parse("rmsprop").is_err());
    }

    #[test]
    fn test_multi_value_field_width() {
        let mut config = ModelConfig::new(7, 50);
        config.multi_value_field = Some(6);
        assert_eq!(config.single_value_fields(), 6);
        assert_eq!(config.block_input_width(0), config.embedding_size);
        assert_eq!(config.block_input_width(1), config.block_shape[0]);
    }
}
