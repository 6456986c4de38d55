use anyhow::Result;
use image::GrayImage;

use crate::detect::result::{BoundingBox, DetectorParams};

/// Detector backend trait.
///
/// Backends receive the downscaled single-channel detection frame and return
/// boxes in that frame's coordinates. Rescaling to full resolution is the
/// sampler's job, not the backend's.
///
/// An `Err` is not fatal to the caller: the sampler treats it as zero
/// detections for the cycle.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one grayscale frame.
    fn detect(&mut self, image: &GrayImage, params: &DetectorParams) -> Result<Vec<BoundingBox>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: DetectorBackend + ?Sized> DetectorBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, image: &GrayImage, params: &DetectorParams) -> Result<Vec<BoundingBox>> {
        (**self).detect(image, params)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
