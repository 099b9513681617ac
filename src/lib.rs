pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod transform;

use std::path::{Path, PathBuf};
use std::time::Duration;

use capture::frame::{PixelFormat, Resolution};
use serde::{Deserialize, Serialize};

pub use error::{
    ConfigError, DisplayError, MarshalError, OpenFailure, OpenFailureCode, PipelineError,
};

/// System configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub display: DisplayConfig,
    pub transform: TransformConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackend {
    /// Generated test pattern, no hardware needed
    Synthetic,
    V4l2,
    GStreamer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub backend: CaptureBackend,
    /// Device node; empty means auto-detect
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
    /// Frame period of the synthetic camera
    pub synthetic_interval_ms: u64,
}

impl CaptureConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum spacing between accepted frames
    pub min_interval_ms: u64,
    /// Frames held between camera delivery and the worker
    pub queue_depth: usize,
    /// Results held between the worker and the presentation thread
    pub present_queue_depth: usize,
    /// Processing state entered on every `start`; off unless opted in
    pub start_enabled: bool,
}

impl PipelineConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    /// Where the headless surface writes its last image on exit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Gaussian sigma applied before edge extraction
    pub blur_sigma: f32,
    /// Laplacian magnitude at or above which a pixel counts as an edge
    pub threshold: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            pipeline: PipelineConfig::default(),
            display: DisplayConfig::default(),
            transform: TransformConfig::default(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: CaptureBackend::Synthetic,
            device: String::new(),
            width: 640,
            height: 480,
            fps: 30,
            format: PixelFormat::Nv12,
            buffer_count: 3,
            synthetic_interval_ms: 33,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 150,
            queue_depth: 2,
            present_queue_depth: 4,
            start_enabled: false,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            snapshot_path: None,
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            blur_sigma: 1.0,
            threshold: 24,
        }
    }
}

impl Config {
    /// Defaults, overlaid by `path` when given, overlaid by `EDGECAM__*`
    /// environment variables (`EDGECAM__PIPELINE__MIN_INTERVAL_MS=100`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix("EDGECAM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "capture resolution {} is empty",
                self.capture.resolution()
            )));
        }
        if self.pipeline.queue_depth == 0 {
            return Err(ConfigError::Invalid("pipeline.queue_depth must be at least 1".into()));
        }
        if !self.transform.blur_sigma.is_finite() || self.transform.blur_sigma < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "transform.blur_sigma {} is not a non-negative number",
                self.transform.blur_sigma
            )));
        }
        Ok(())
    }
}
