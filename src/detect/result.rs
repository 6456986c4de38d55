/// Axis-aligned box in pixel coordinates of the frame it was found in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Map a box found in a frame downscaled by `factor` back to the
    /// full-resolution frame. All four fields are divided by `factor` and
    /// truncated the same way.
    pub fn rescaled(self, factor: f64) -> Self {
        let up = |v: u32| (v as f64 / factor) as u32;
        Self {
            x: up(self.x),
            y: up(self.y),
            width: up(self.width),
            height: up(self.height),
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Boxes from one sampled frame. Empty means "no presence".
pub type DetectionResult = Vec<BoundingBox>;

/// Tuning knobs handed to the detector on every call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectorParams {
    /// Image pyramid step between scales (> 1.0).
    pub scale_factor: f64,
    /// Minimum supporting hits before a candidate counts as a detection.
    pub min_neighbors: u32,
    /// Smallest box edge accepted, in detection-frame pixels.
    pub min_box_size: u32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 7,
            min_box_size: 30,
        }
    }
}
