//! Checkpoint persistence for GraphFM weights.
//!
//! Weights are stored at full precision so a restored model reproduces the
//! saved model's predictions exactly. A small JSON index next to the weight
//! files lists the retained checkpoints, newest last.

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::backend::Backend,
};
use serde::{Deserialize, Serialize};

use super::model::GraphFm;

pub type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Checkpoints kept on disk before the oldest is deleted.
pub const MAX_TO_KEEP: usize = 5;

pub const INDEX_FILE: &str = "checkpoint.json";

/// Validation loss a run has to beat before its first checkpoint is written.
pub const INITIAL_BEST_LOSS: f64 = 1.0;

/// Saves `model` to `path` (the recorder appends `.mpk`).
pub fn save_model<B: Backend>(model: &GraphFm<B>, path: &Path) -> Result<(), String> {
    model
        .clone()
        .save_file(path.to_path_buf(), &CheckpointRecorder::new())
        .map_err(|e| format!("failed to save checkpoint {}: {:?}", path.display(), e))
}

/// Loads weights from `path` into `model`, which must share its configuration.
pub fn load_model<B: Backend>(model: GraphFm<B>, path: &Path, device: &B::Device) -> Result<GraphFm<B>, String> {
    model
        .load_file(path.to_path_buf(), &CheckpointRecorder::new(), device)
        .map_err(|e| format!("failed to load checkpoint {}: {:?}", path.display(), e))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointIndex {
    /// Checkpoint stems relative to the run directory, oldest first
    pub checkpoints: Vec<String>,
}

impl CheckpointIndex {
    pub fn latest(&self) -> Option<&str> {
        self.checkpoints.last().map(String::as_str)
    }
}

/// Writes checkpoints into one run directory and keeps the best-loss record.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    run_dir: PathBuf,
    pub best_loss: f64,
}

impl CheckpointManager {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
            best_loss: INITIAL_BEST_LOSS,
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn read_index(dir: &Path) -> Result<Option<CheckpointIndex>, String> {
        let path = dir.join(INDEX_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| format!("corrupt checkpoint index {}: {}", path.display(), e))
    }

    fn write_index(&self, index: &CheckpointIndex) -> Result<(), String> {
        let path = self.run_dir.join(INDEX_FILE);
        let text = serde_json::to_string_pretty(index).map_err(|e| format!("cannot encode index: {}", e))?;
        fs::write(&path, text).map_err(|e| format!("cannot write {}: {}", path.display(), e))
    }

    /// Saves `model-{step}` and prunes the index to [`MAX_TO_KEEP`] entries.
    pub fn save<B: Backend>(&self, model: &GraphFm<B>, step: usize) -> Result<PathBuf, String> {
        fs::create_dir_all(&self.run_dir)
            .map_err(|e| format!("cannot create {}: {}", self.run_dir.display(), e))?;

        let stem = format!("model-{}", step);
        let path = self.run_dir.join(&stem);
        save_model(model, &path)?;

        let mut index = Self::read_index(&self.run_dir)?.unwrap_or_default();
        index.checkpoints.retain(|s| s != &stem);
        index.checkpoints.push(stem);
        while index.checkpoints.len() > MAX_TO_KEEP {
            let stale = index.checkpoints.remove(0);
            let stale_path = self.run_dir.join(format!("{}.mpk", stale));
            if let Err(e) = fs::remove_file(&stale_path) {
                log::warn!("could not remove old checkpoint {}: {}", stale_path.display(), e);
            }
        }
        self.write_index(&index)?;

        Ok(path)
    }

    /// Saves when `valid_loss` beats the best loss so far; returns the
    /// previous best on save.
    pub fn save_if_improved<B: Backend>(
        &mut self,
        model: &GraphFm<B>,
        step: usize,
        valid_loss: f64,
    ) -> Result<Option<f64>, String> {
        if valid_loss >= self.best_loss {
            return Ok(None);
        }
        let previous = self.best_loss;
        self.save(model, step)?;
        self.best_loss = valid_loss;
        Ok(Some(previous))
    }

    /// Loads the latest checkpoint listed in `dir`, if any.
    pub fn restore_latest<B: Backend>(
        model: GraphFm<B>,
        dir: &Path,
        device: &B::Device,
    ) -> Result<(GraphFm<B>, Option<PathBuf>), String> {
        let latest = Self::read_index(dir)?.and_then(|index| index.latest().map(|stem| dir.join(stem)));

        match latest {
            Some(path) => {
                let model = load_model(model, &path, device)?;
                log::info!("restored from {}", path.display());
                Ok((model, Some(path)))
            }
            None => Ok((model, None)),
        }
    }
}
