use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::backends::{BackendOptions, BACKEND_NAMES};
use crate::detect::{DetectorParams, SamplerConfig};
use crate::frame::FrameSize;
use crate::ingest::SourceSettings;
use crate::recorder::ControllerConfig;

const DEFAULT_SOURCE_URI: &str = "stub://camera";
const DEFAULT_OUTPUT_DIR: &str = ".";
const DEFAULT_OUTPUT_PREFIX: &str = "motion";
const DEFAULT_OUTPUT_EXTENSION: &str = "avi";
const DEFAULT_OUTPUT_FPS: f64 = 15.0;
const DEFAULT_FRAME_WIDTH: u32 = 800;
const DEFAULT_FRAME_HEIGHT: u32 = 600;
const DEFAULT_DETECTION_INTERVAL: u64 = 5;
const DEFAULT_DOWNSCALE_FACTOR: f64 = 0.5;
const DEFAULT_DETECTOR_BACKEND: &str = "cpu";
const DEFAULT_HYSTERESIS_SECS: f64 = 5.0;

#[derive(Debug, Deserialize, Default)]
struct PresencedConfigFile {
    source: Option<SourceConfigFile>,
    detection: Option<DetectionConfigFile>,
    recording: Option<RecordingConfigFile>,
    output: Option<OutputConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    retry_limit: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    backend: Option<String>,
    interval_frames: Option<u64>,
    downscale_factor: Option<f64>,
    scale_factor: Option<f64>,
    min_neighbors: Option<u32>,
    min_box_size: Option<u32>,
    model_path: Option<PathBuf>,
    model_input_width: Option<u32>,
    model_input_height: Option<u32>,
    confidence_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct RecordingConfigFile {
    hysteresis_window_secs: Option<f64>,
    overlay: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    dir: Option<PathBuf>,
    prefix: Option<String>,
    extension: Option<String>,
    fps: Option<f64>,
    width: Option<u32>,
    height: Option<u32>,
}

/// Daemon configuration: file at `$PRESENCE_CONFIG` (JSON, or TOML for a
/// `.toml` path), then `PRESENCE_*` overrides, then validation.
#[derive(Debug, Clone)]
pub struct PresencedConfig {
    pub source_uri: String,
    pub output_dir: PathBuf,
    pub detector_backend: String,
    pub detector_options: BackendOptions,
    pub recorder: ControllerConfig,
}

impl PresencedConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PRESENCE_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like `load`, with the file path supplied by the caller.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Settings handed to the controller.
    pub fn controller_config(&self) -> ControllerConfig {
        self.recorder.clone()
    }

    /// Capture geometry; sources deliver frames at the output size and rate.
    pub fn source_settings(&self) -> SourceSettings {
        SourceSettings {
            width: self.recorder.output_frame_size.width,
            height: self.recorder.output_frame_size.height,
            target_fps: self.recorder.output_fps.round().max(1.0) as u32,
        }
    }

    fn from_file(file: PresencedConfigFile) -> Result<Self> {
        let source = file.source.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let recording = file.recording.unwrap_or_default();
        let output = file.output.unwrap_or_default();

        let defaults = DetectorParams::default();
        let params = DetectorParams {
            scale_factor: detection.scale_factor.unwrap_or(defaults.scale_factor),
            min_neighbors: detection.min_neighbors.unwrap_or(defaults.min_neighbors),
            min_box_size: detection.min_box_size.unwrap_or(defaults.min_box_size),
        };
        let recorder = ControllerConfig {
            sampler: SamplerConfig {
                interval_frames: detection
                    .interval_frames
                    .unwrap_or(DEFAULT_DETECTION_INTERVAL),
                downscale_factor: detection
                    .downscale_factor
                    .unwrap_or(DEFAULT_DOWNSCALE_FACTOR),
                params,
            },
            hysteresis_window: hysteresis_window(
                recording
                    .hysteresis_window_secs
                    .unwrap_or(DEFAULT_HYSTERESIS_SECS),
            )?,
            output_fps: output.fps.unwrap_or(DEFAULT_OUTPUT_FPS),
            output_frame_size: FrameSize::new(
                output.width.unwrap_or(DEFAULT_FRAME_WIDTH),
                output.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
            ),
            output_prefix: output
                .prefix
                .unwrap_or_else(|| DEFAULT_OUTPUT_PREFIX.to_string()),
            output_extension: output
                .extension
                .unwrap_or_else(|| DEFAULT_OUTPUT_EXTENSION.to_string()),
            draw_overlay: recording.overlay.unwrap_or(true),
            source_retry_limit: source.retry_limit.unwrap_or(0),
            ..ControllerConfig::default()
        };
        let option_defaults = BackendOptions::default();
        let detector_options = BackendOptions {
            model_path: detection.model_path,
            input_width: detection
                .model_input_width
                .unwrap_or(option_defaults.input_width),
            input_height: detection
                .model_input_height
                .unwrap_or(option_defaults.input_height),
            confidence_threshold: detection
                .confidence_threshold
                .unwrap_or(option_defaults.confidence_threshold),
        };

        Ok(Self {
            source_uri: source
                .uri
                .unwrap_or_else(|| DEFAULT_SOURCE_URI.to_string()),
            output_dir: output
                .dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            detector_backend: detection
                .backend
                .unwrap_or_else(|| DEFAULT_DETECTOR_BACKEND.to_string()),
            detector_options,
            recorder,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(uri) = std::env::var("PRESENCE_SOURCE") {
            if !uri.trim().is_empty() {
                self.source_uri = uri;
            }
        }
        if let Ok(dir) = std::env::var("PRESENCE_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(prefix) = std::env::var("PRESENCE_OUTPUT_PREFIX") {
            if !prefix.trim().is_empty() {
                self.recorder.output_prefix = prefix;
            }
        }
        if let Ok(backend) = std::env::var("PRESENCE_DETECTOR_BACKEND") {
            if !backend.trim().is_empty() {
                self.detector_backend = backend.trim().to_lowercase();
            }
        }
        if let Ok(model) = std::env::var("PRESENCE_DETECTOR_MODEL") {
            if !model.trim().is_empty() {
                self.detector_options.model_path = Some(PathBuf::from(model));
            }
        }
        if let Ok(interval) = std::env::var("PRESENCE_DETECTION_INTERVAL") {
            self.recorder.sampler.interval_frames = interval.trim().parse().map_err(|_| {
                anyhow!("PRESENCE_DETECTION_INTERVAL must be an integer number of frames")
            })?;
        }
        if let Ok(secs) = std::env::var("PRESENCE_HYSTERESIS_SECS") {
            let secs: f64 = secs
                .trim()
                .parse()
                .map_err(|_| anyhow!("PRESENCE_HYSTERESIS_SECS must be a number of seconds"))?;
            self.recorder.hysteresis_window = hysteresis_window(secs)?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if !BACKEND_NAMES.contains(&self.detector_backend.as_str()) {
            return Err(anyhow!(
                "unknown detector backend '{}' (expected one of {})",
                self.detector_backend,
                BACKEND_NAMES.join(", ")
            ));
        }
        if self.detector_backend == "tract" && self.detector_options.model_path.is_none() {
            return Err(anyhow!(
                "detector backend 'tract' needs detection.model_path or PRESENCE_DETECTOR_MODEL"
            ));
        }
        let threshold = self.detector_options.confidence_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(anyhow!("confidence threshold {} is outside (0, 1]", threshold));
        }
        if self.detector_options.input_width == 0 || self.detector_options.input_height == 0 {
            return Err(anyhow!("model input size must not be empty"));
        }
        if self.source_uri.trim().is_empty() {
            return Err(anyhow!("source uri must not be empty"));
        }
        self.recorder.validate()?;
        self.recorder.output_extension = self
            .recorder
            .output_extension
            .trim_start_matches('.')
            .to_string();
        Ok(())
    }
}

fn hysteresis_window(secs: f64) -> Result<Duration> {
    if !(secs.is_finite() && secs > 0.0) {
        return Err(anyhow!("hysteresis window must be a positive number of seconds"));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| anyhow!("hysteresis window {}s out of range: {}", secs, e))
}

fn read_config_file(path: &Path) -> Result<PresencedConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
