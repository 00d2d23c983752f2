//! Configuration loaded from YAML. Every section and every field is optional.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    diminish::{AlignerConfig, DiminishConfig, FaceConfig, MaskConfig, ObjectConfig},
    error::ConfigError,
    slam::{MapperConfig, OdometryConfig, PipelineConfig, SchedulerConfig, SessionConfig},
};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Depth/color pairing
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Tracker lifecycle and sensor calibration
    #[serde(default)]
    pub session: SessionConfig,

    /// Capture queue in front of the worker
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub odometry: OdometryConfig,

    #[serde(default)]
    pub mapper: MapperConfig,

    /// Image registration
    #[serde(default)]
    pub aligner: AlignerConfig,

    /// Difference mask cleanup
    #[serde(default)]
    pub mask: MaskConfig,

    /// Face protection, enabled by `face.model`
    #[serde(default)]
    pub face: FaceConfig,

    /// Color keyed object protection, enabled by the presence of the section
    #[serde(default)]
    pub object: Option<ObjectConfig>,

    #[serde(default)]
    pub diminish: DiminishConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}
