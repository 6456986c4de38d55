//! Frame buffers and pixel transforms.
//!
//! - `Frame`: one captured picture, owned by the cycle that pulled it.
//! - Downscale / grayscale transforms used by the detection sampler.
//! - Box overlay drawing used before frames are handed to a writer.
//!
//! Frames are never cloned implicitly; a cycle pulls one, mutates it (overlay),
//! and drops it once the writer has consumed it.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};

use crate::detect::BoundingBox;

/// Overlay color while a session is open (RGB).
pub const RECORDING_COLOR: [u8; 3] = [255, 0, 0];

/// Overlay color while idle (RGB).
pub const IDLE_COLOR: [u8; 3] = [0, 255, 0];

/// Overlay stroke width in pixels.
pub const OVERLAY_THICKNESS: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 8-bit RGB.
    Rgb24,
    /// Single-channel 8-bit intensity.
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// Output resolution of a recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// A captured frame.
///
/// There is deliberately no `Clone`: a frame belongs to exactly one cycle.
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl Frame {
    /// Wrap a pixel buffer. The length must match `width * height * bpp`.
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let expected = expected_len(width, height, format)?;
        if data.len() != expected {
            return Err(anyhow!(
                "frame length mismatch: expected {} bytes for {}x{} {:?}, got {}",
                expected,
                width,
                height,
                format,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            format,
        })
    }

    pub fn rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        Self::new(data, width, height, PixelFormat::Rgb24)
    }

    /// Solid-color RGB frame.
    pub fn filled(width: u32, height: u32, color: [u8; 3]) -> Result<Self> {
        let pixels = (width as usize) * (height as usize);
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend_from_slice(&color);
        }
        Self::rgb(data, width, height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Resize by `factor` on both axes. Output dimensions are
    /// `round(dim * factor)`, never below one pixel.
    pub fn downscaled(&self, factor: f64) -> Result<Frame> {
        if !(factor > 0.0 && factor <= 1.0) {
            return Err(anyhow!("downscale factor must be in (0, 1], got {}", factor));
        }
        let width = scaled_dimension(self.width, factor);
        let height = scaled_dimension(self.height, factor);
        if width == self.width && height == self.height {
            return Frame::new(self.data.clone(), width, height, self.format);
        }
        let data = match self.format {
            PixelFormat::Rgb24 => {
                imageops::resize(&self.as_rgb_image()?, width, height, FilterType::Triangle)
                    .into_raw()
            }
            PixelFormat::Gray8 => {
                imageops::resize(&self.as_gray_image()?, width, height, FilterType::Triangle)
                    .into_raw()
            }
        };
        Frame::new(data, width, height, self.format)
    }

    /// Single-channel intensity image for detectors.
    pub fn to_luma(&self) -> Result<GrayImage> {
        match self.format {
            PixelFormat::Gray8 => self.as_gray_image(),
            PixelFormat::Rgb24 => Ok(imageops::grayscale(&self.as_rgb_image()?)),
        }
    }

    /// Packed RGB24 pixels at `size`, converting and resizing as needed.
    pub fn rgb24_bytes(&self, size: FrameSize) -> Result<Vec<u8>> {
        let rgb = match self.format {
            PixelFormat::Rgb24 => self.as_rgb_image()?,
            PixelFormat::Gray8 => image::DynamicImage::ImageLuma8(self.as_gray_image()?).to_rgb8(),
        };
        if rgb.dimensions() == (size.width, size.height) {
            return Ok(rgb.into_raw());
        }
        Ok(imageops::resize(&rgb, size.width, size.height, FilterType::Triangle).into_raw())
    }

    /// Draw rectangle outlines. Boxes are clipped to the frame.
    pub fn draw_boxes(&mut self, boxes: &[BoundingBox], color: [u8; 3], thickness: u32) {
        for bbox in boxes {
            self.draw_box(bbox, color, thickness);
        }
    }

    fn draw_box(&mut self, bbox: &BoundingBox, color: [u8; 3], thickness: u32) {
        if bbox.width == 0 || bbox.height == 0 || bbox.x >= self.width || bbox.y >= self.height {
            return;
        }
        let x0 = bbox.x;
        let y0 = bbox.y;
        let x1 = bbox.x.saturating_add(bbox.width - 1).min(self.width - 1);
        let y1 = bbox.y.saturating_add(bbox.height - 1).min(self.height - 1);
        let t = thickness.max(1);

        for y in y0..=y1 {
            for x in x0..=x1 {
                let on_edge = x < x0 + t || y < y0 + t || x + t > x1 || y + t > y1;
                if on_edge {
                    self.put_pixel(x, y, color);
                }
            }
        }
    }

    fn put_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        let idx = (y as usize * self.width as usize + x as usize) * self.format.bytes_per_pixel();
        match self.format {
            PixelFormat::Rgb24 => self.data[idx..idx + 3].copy_from_slice(&color),
            PixelFormat::Gray8 => self.data[idx] = color.iter().copied().max().unwrap_or(0),
        }
    }

    fn as_rgb_image(&self) -> Result<RgbImage> {
        ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| anyhow!("RGB buffer does not match {}x{}", self.width, self.height))
    }

    fn as_gray_image(&self) -> Result<GrayImage> {
        ImageBuffer::<Luma<u8>, Vec<u8>>::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| anyhow!("gray buffer does not match {}x{}", self.width, self.height))
    }
}

impl std::fmt::Debug for Frame {
    // Pixel bytes are never printed.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// `round(dim * factor)`, clamped to at least one pixel.
pub fn scaled_dimension(dim: u32, factor: f64) -> u32 {
    ((dim as f64 * factor).round() as u32).max(1)
}

fn expected_len(width: u32, height: u32, format: PixelFormat) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(format.bytes_per_pixel()))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_length_mismatch() {
        assert!(Frame::rgb(vec![0u8; 10], 2, 2).is_err());
        assert!(Frame::new(vec![0u8; 4], 2, 2, PixelFormat::Gray8).is_ok());
    }

    #[test]
    fn downscale_halves_dimensions() -> Result<()> {
        let frame = Frame::filled(800, 600, [10, 20, 30])?;
        let small = frame.downscaled(0.5)?;
        assert_eq!((small.width(), small.height()), (400, 300));
        assert_eq!(small.format(), PixelFormat::Rgb24);
        assert_eq!(&small.pixels()[..3], &[10, 20, 30]);
        Ok(())
    }

    #[test]
    fn downscale_rejects_out_of_range_factor() -> Result<()> {
        let frame = Frame::filled(4, 4, [0, 0, 0])?;
        assert!(frame.downscaled(0.0).is_err());
        assert!(frame.downscaled(1.5).is_err());
        Ok(())
    }

    #[test]
    fn scaled_dimension_never_collapses() {
        assert_eq!(scaled_dimension(3, 0.1), 1);
        assert_eq!(scaled_dimension(801, 0.5), 401);
    }

    #[test]
    fn luma_of_white_is_white() -> Result<()> {
        let frame = Frame::filled(3, 2, [255, 255, 255])?;
        let gray = frame.to_luma()?;
        assert_eq!(gray.dimensions(), (3, 2));
        assert!(gray.pixels().all(|p| p.0[0] == 255));
        Ok(())
    }

    #[test]
    fn overlay_draws_outline_only() -> Result<()> {
        let mut frame = Frame::filled(10, 10, [0, 0, 0])?;
        let bbox = BoundingBox::new(2, 2, 6, 6);
        frame.draw_boxes(&[bbox], RECORDING_COLOR, 1);

        let px = |x: usize, y: usize| {
            let i = (y * 10 + x) * 3;
            [frame.pixels()[i], frame.pixels()[i + 1], frame.pixels()[i + 2]]
        };
        assert_eq!(px(2, 2), RECORDING_COLOR);
        assert_eq!(px(7, 7), RECORDING_COLOR);
        assert_eq!(px(4, 4), [0, 0, 0]);
        assert_eq!(px(0, 0), [0, 0, 0]);
        Ok(())
    }

    #[test]
    fn overlay_clips_boxes_past_the_edge() -> Result<()> {
        let mut frame = Frame::filled(4, 4, [0, 0, 0])?;
        frame.draw_boxes(&[BoundingBox::new(2, 2, 50, 50)], IDLE_COLOR, 2);
        frame.draw_boxes(&[BoundingBox::new(9, 9, 3, 3)], IDLE_COLOR, 2);
        assert_eq!(&frame.pixels()[(2 * 4 + 2) * 3..(2 * 4 + 2) * 3 + 3], &IDLE_COLOR);
        Ok(())
    }

    #[test]
    fn gray_frames_expand_to_rgb() -> Result<()> {
        let frame = Frame::new(vec![7, 9], 2, 1, PixelFormat::Gray8)?;
        assert_eq!(frame.rgb24_bytes(frame.size())?, vec![7, 7, 7, 9, 9, 9]);
        Ok(())
    }

    #[test]
    fn rgb_bytes_resize_to_requested_size() -> Result<()> {
        let frame = Frame::filled(8, 6, [1, 2, 3])?;
        let bytes = frame.rgb24_bytes(FrameSize::new(4, 3))?;
        assert_eq!(bytes.len(), 4 * 3 * 3);
        Ok(())
    }
}
