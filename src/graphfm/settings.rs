//! Settings module for GraphFM process configuration.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphFmSettings {
    /// Directory visualization dumps are written to.
    pub data_path: PathBuf,

    /// Root directory for checkpoints. Each run writes to `checkpoint_dir/<run>/`.
    /// No checkpoints are written when unset.
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for GraphFmSettings {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("data"),
            checkpoint_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestingSettings {
    /// Set by CI systems; shortens the demo run.
    pub ci: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub graphfm: GraphFmSettings,
    pub testing: TestingSettings,
}

impl Settings {
    /// Loads settings from defaults, an optional `.env` file and `GRAPHFM__`
    /// prefixed environment variables, in increasing precedence.
    pub fn new() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("graphfm.data_path", "data")?
            .set_default("graphfm.checkpoint_dir", None::<String>)?
            .set_default("testing.ci", false)?
            .add_source(File::with_name(".env").required(false))
            .add_source(Environment::with_prefix("GRAPHFM").separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}

static SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Get the global settings instance, initializing it if necessary.
pub fn settings() -> &'static Settings {
    SETTINGS.get_or_init(|| Settings::new().unwrap_or_else(|_| Settings::default()))
}
