//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! `SimulationConfig` and `DatasetConfig` are also built directly in
//! code by library users; both validate themselves before use.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

use crate::data::synthetic::SyntheticConfig;
use crate::types::{SimError, SimResult};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub simulation: SimulationConfig,
    pub dataset: DatasetConfig,
    pub synthetic: SyntheticConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Closed-loop simulation parameters.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Replay the recorded ego instead of querying the ego model.
    pub use_ego_gt: bool,
    /// Replay recorded agents instead of querying the agents model.
    pub use_agents_gt: bool,
    /// After the first simulated frame, never admit agents that were not
    /// tracked already.
    pub disable_new_agents: bool,
    /// Untracked agents closer than this (metres) may be admitted.
    pub distance_th_close: f64,
    /// Tracked agents farther than this (metres) are evicted.
    pub distance_th_far: f64,
    /// `None` runs until the shortest scene ends. Required in TOML, where
    /// `"all"` stands for `None`.
    #[serde(with = "simulation_steps")]
    pub num_simulation_steps: Option<usize>,
    pub start_frame_index: usize,
}

mod simulation_steps {
    use serde::{Deserialize, Deserializer, Serializer};

    const ALL: &str = "all";

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Steps {
        Count(usize),
        Keyword(String),
    }

    pub fn serialize<S: Serializer>(steps: &Option<usize>, serializer: S) -> Result<S::Ok, S::Error> {
        match steps {
            Some(n) => serializer.serialize_u64(*n as u64),
            None => serializer.serialize_str(ALL),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<usize>, D::Error> {
        match Steps::deserialize(deserializer)? {
            Steps::Count(n) => Ok(Some(n)),
            Steps::Keyword(k) if k == ALL => Ok(None),
            Steps::Keyword(k) => Err(serde::de::Error::custom(format!(
                "num_simulation_steps must be a step count or \"{ALL}\", got \"{k}\""
            ))),
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> SimResult<()> {
        if !self.distance_th_close.is_finite() || self.distance_th_close < 0.0 {
            return Err(SimError::Config(format!(
                "distance_th_close must be a non-negative number, got {}",
                self.distance_th_close
            )));
        }
        if !self.distance_th_far.is_finite() || self.distance_th_far < self.distance_th_close {
            return Err(SimError::Config(format!(
                "distance_th_far ({}) must be >= distance_th_close ({})",
                self.distance_th_far, self.distance_th_close
            )));
        }
        if self.num_simulation_steps == Some(0) {
            return Err(SimError::Config("num_simulation_steps must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Sample construction parameters for the ego/agent dataset.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DatasetConfig {
    /// Past frames carried in each sample (in addition to the current one).
    pub history_num_frames: usize,
    /// Future frames carried as targets; also the ground-truth horizon.
    pub future_num_frames: usize,
    /// Raster (width, height) in pixels.
    pub raster_size: [usize; 2],
    pub num_channels: usize,
    /// Agents whose best object-class probability is at or below this
    /// are hidden from the rasterizer.
    pub filter_agents_threshold: f64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            history_num_frames: 3,
            future_num_frames: 12,
            raster_size: [112, 112],
            num_channels: 5,
            filter_agents_threshold: 0.5,
        }
    }
}

impl DatasetConfig {
    pub fn validate(&self) -> SimResult<()> {
        if self.future_num_frames == 0 {
            return Err(SimError::Config("future_num_frames must be at least 1".to_string()));
        }
        if self.raster_size.contains(&0) || self.num_channels == 0 {
            return Err(SimError::Config(format!(
                "raster must be non-empty, got {:?} x {} channels",
                self.raster_size, self.num_channels
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of the human-readable format.
    #[serde(default)]
    pub json: bool,
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    #[serde(default)]
    pub filter: Option<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate a TOML document.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Invalid TOML")?;
        config.simulation.validate()?;
        config.dataset.validate()?;
        Ok(config)
    }
}
