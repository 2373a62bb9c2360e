use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::config::EngineConfig;
use crate::error::{map_io_err, EngineError, EngineResult};

const APP_DIR: &str = "ops-pilot";

/// Values supplied on the command line, applied over the file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub max_trials: Option<u64>,
    pub seed: Option<u64>,
}

impl ConfigOverrides {
    /// Apply every set override to `config`
    pub fn apply(&self, config: &mut EngineConfig) {
        if let Some(max_trials) = self.max_trials {
            config.max_trials = max_trials;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
    }
}

/// The configuration loader
pub struct ConfigLoader {
    config_path: PathBuf,
    /// Whether the path was chosen explicitly by the caller
    explicit: bool,
}

impl ConfigLoader {
    /// Loader for the default config location
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
            explicit: false,
        }
    }

    /// Set a custom config path
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            config_path: path,
            explicit: true,
        }
    }

    /// `<config dir>/ops-pilot/config.toml`
    fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("ops-pilot.toml"))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Defaults, then the config file if one exists, then validation
    pub fn load(&self) -> EngineResult<EngineConfig> {
        self.load_with(&ConfigOverrides::default())
    }

    /// Defaults, then the config file, then `overrides`, then validation
    pub fn load_with(&self, overrides: &ConfigOverrides) -> EngineResult<EngineConfig> {
        let mut config = if self.config_path.exists() {
            let content =
                fs::read_to_string(&self.config_path).map_err(map_io_err(&self.config_path))?;
            let config = EngineConfig::from_toml(&content).map_err(|e| {
                EngineError::invalid_config(format!("{}: {}", self.config_path.display(), e))
            })?;
            info!("Loaded configuration from {}", self.config_path.display());
            config
        } else {
            if self.explicit {
                info!(
                    "Config file {} not found, using defaults",
                    self.config_path.display()
                );
            } else {
                debug!("No config file at {}, using defaults", self.config_path.display());
            }
            EngineConfig::default()
        };

        overrides.apply(&mut config);
        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Locations of the engine's durable artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    pub q_table: PathBuf,
    pub trial_log: PathBuf,
    pub report: PathBuf,
}

impl StoragePaths {
    /// Standard file names inside `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            q_table: dir.join("q_table.json"),
            trial_log: dir.join("trials.jsonl"),
            report: dir.join("report.json"),
        }
    }

    /// `<local data dir>/ops-pilot/`, falling back to the working directory
    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|dir| dir.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from(".ops-pilot"))
    }

    /// Override individual paths, keeping defaults for the rest
    pub fn with_overrides(
        mut self,
        q_table: Option<PathBuf>,
        trial_log: Option<PathBuf>,
        report: Option<PathBuf>,
    ) -> Self {
        if let Some(path) = q_table {
            self.q_table = path;
        }
        if let Some(path) = trial_log {
            self.trial_log = path;
        }
        if let Some(path) = report {
            self.report = path;
        }
        self
    }
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::in_dir(Self::data_dir())
    }
}
