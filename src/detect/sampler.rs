//! Throttled detection: decide, downscale, detect, rescale.

use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, DetectionResult, DetectorParams};
use crate::frame::Frame;

/// Sampler settings, taken from the controller configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerConfig {
    /// Run the detector every N frames (N >= 1).
    pub interval_frames: u64,
    /// Downscale applied before detection, in (0, 1].
    pub downscale_factor: f64,
    pub params: DetectorParams,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_frames: 5,
            downscale_factor: 0.5,
            params: DetectorParams::default(),
        }
    }
}

/// Runs the detector on every `interval_frames`-th frame.
pub struct DetectionSampler {
    backend: Box<dyn DetectorBackend>,
    config: SamplerConfig,
    runs: u64,
    failures: u64,
}

impl DetectionSampler {
    pub fn new(backend: Box<dyn DetectorBackend>, config: SamplerConfig) -> Self {
        Self {
            backend,
            config,
            runs: 0,
            failures: 0,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// `frame_index % interval_frames == 0`.
    pub fn should_detect(&self, frame_index: u64) -> bool {
        frame_index % self.config.interval_frames.max(1) == 0
    }

    /// Number of cycles on which the detector was invoked.
    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// Number of detector invocations that failed.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Sample one frame.
    ///
    /// Returns `None` when this index is throttled, otherwise the boxes in
    /// full-resolution coordinates. A failing detector yields `Some(vec![])`.
    pub fn sample(&mut self, frame_index: u64, frame: &Frame) -> Option<DetectionResult> {
        if !self.should_detect(frame_index) {
            return None;
        }
        self.runs += 1;

        match self.run_detector(frame) {
            Ok(boxes) => Some(boxes),
            Err(err) => {
                self.failures += 1;
                log::warn!(
                    "detector '{}' failed on frame {}: {:#} (treating as no detections)",
                    self.backend.name(),
                    frame_index,
                    err
                );
                Some(Vec::new())
            }
        }
    }

    fn run_detector(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>> {
        let factor = self.config.downscale_factor;
        let small = frame.downscaled(factor)?;
        let gray = small.to_luma()?;
        let boxes = self.backend.detect(&gray, &self.config.params)?;
        Ok(boxes.into_iter().map(|bbox| bbox.rescaled(factor)).collect())
    }
}
