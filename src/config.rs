//! Pipeline configuration loading.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::tracker::{BindingConfig, ScreenOrientation, TargetOptions};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default, rename = "target")]
    pub targets: Vec<TargetEntry>,
    #[serde(default, rename = "binding")]
    pub bindings: Vec<BindingConfig>,
    #[serde(default)]
    pub camera: Option<CameraConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Tracker units to engine units (tracker reports millimetres)
    #[serde(default = "default_unit_scale")]
    pub unit_scale: f32,
    /// Rate of the background tracker-update loop
    #[serde(default = "default_update_rate")]
    pub update_rate_hz: f32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            unit_scale: default_unit_scale(),
            update_rate_hz: default_update_rate(),
        }
    }
}

fn default_unit_scale() -> f32 {
    0.001
}

fn default_update_rate() -> f32 {
    30.0
}

/// One target to declare with the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetEntry {
    pub tag: String,
    /// Tracker configuration string, e.g. `single;data/hiro.patt;80`
    pub config: String,
    #[serde(default)]
    pub options: TargetOptions,
    /// Candidate for the world-reference base target
    #[serde(default)]
    pub origin_candidate: bool,
    /// Insert ahead of earlier candidates
    #[serde(default)]
    pub at_front: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Target the camera follows; the base target when unset
    #[serde(default)]
    pub tag: Option<String>,
    /// Row-major optical offset for see-through displays
    #[serde(default)]
    pub optical_offset: Option<[f32; 16]>,
    #[serde(default)]
    pub orientation: ScreenOrientation,
}

impl PipelineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject binding values that would break the frame loop.
    pub fn validate(&self) -> Result<()> {
        self.bindings.iter().try_for_each(BindingConfig::validate)
    }

    /// Read and parse the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        info!(
            path = %path.display(),
            targets = config.targets.len(),
            bindings = config.bindings.len(),
            "Loaded pipeline configuration"
        );
        Ok(config)
    }
}
