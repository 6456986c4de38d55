use anyhow::Result;
use image::GrayImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, DetectorParams};

/// Intensity at or above which the stub backend treats a pixel as "present".
pub const STUB_PRESENCE_LEVEL: u8 = 250;

/// Stub backend for testing.
///
/// Reports a single box around every saturated pixel in the frame. Synthetic
/// sources paint a white rectangle to simulate presence, which this backend
/// finds without any model.
#[derive(Default)]
pub struct StubBackend {
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `detect` calls so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, image: &GrayImage, _params: &DetectorParams) -> Result<Vec<BoundingBox>> {
        self.calls += 1;

        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, pixel) in image.enumerate_pixels() {
            if pixel.0[0] < STUB_PRESENCE_LEVEL {
                continue;
            }
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }

        Ok(bounds
            .map(|(x0, y0, x1, y1)| vec![BoundingBox::new(x0, y0, x1 - x0 + 1, y1 - y0 + 1)])
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn stub_backend_boxes_saturated_pixels() -> Result<()> {
        let mut backend = StubBackend::new();
        let params = DetectorParams::default();

        let mut image = GrayImage::from_pixel(20, 10, Luma([40]));
        assert!(backend.detect(&image, &params)?.is_empty());

        for y in 2..5 {
            for x in 3..9 {
                image.put_pixel(x, y, Luma([255]));
            }
        }
        let boxes = backend.detect(&image, &params)?;
        assert_eq!(boxes, vec![BoundingBox::new(3, 2, 6, 3)]);
        assert_eq!(backend.calls(), 2);
        Ok(())
    }
}
