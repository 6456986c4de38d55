use anyhow::Result;
use image::GrayImage;
use std::collections::VecDeque;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, DetectorParams};

/// Side of the square analysis cell, in detection-frame pixels.
const CELL_SIZE: u32 = 8;

/// Absolute intensity change that marks a pixel as changed.
const PIXEL_DIFF_THRESHOLD: u8 = 25;

/// Fraction of changed pixels that marks a cell as active.
const CELL_ACTIVE_RATIO: f32 = 0.25;

/// CPU backend: frame-difference presence detection.
///
/// Compares each detection frame against the previous one. Changed pixels are
/// pooled into cells; 4-connected active cells form candidate regions. A region
/// is reported when it spans at least `min_neighbors` cells and its box is at
/// least `min_box_size` on both axes. `scale_factor` is a pyramid parameter
/// and has no effect on this single-scale backend.
#[derive(Default)]
pub struct CpuBackend {
    previous: Option<GrayImage>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DetectorBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn detect(&mut self, image: &GrayImage, params: &DetectorParams) -> Result<Vec<BoundingBox>> {
        let previous = self.previous.replace(image.clone());
        let Some(previous) = previous else {
            return Ok(Vec::new());
        };
        if previous.dimensions() != image.dimensions() {
            log::debug!("cpu backend: frame size changed, resetting reference");
            return Ok(Vec::new());
        }

        let grid = ActivityGrid::build(&previous, image);
        let mut boxes: Vec<BoundingBox> = grid
            .regions()
            .into_iter()
            .filter(|region| region.cells >= params.min_neighbors as usize)
            .map(|region| region.bounds(image.width(), image.height()))
            .filter(|bbox| bbox.width >= params.min_box_size && bbox.height >= params.min_box_size)
            .collect();
        boxes.sort_by_key(|bbox| (bbox.y, bbox.x));
        Ok(boxes)
    }
}

struct ActivityGrid {
    cols: u32,
    rows: u32,
    active: Vec<bool>,
}

struct Region {
    cells: usize,
    min_col: u32,
    min_row: u32,
    max_col: u32,
    max_row: u32,
}

impl Region {
    fn bounds(&self, width: u32, height: u32) -> BoundingBox {
        let x = self.min_col * CELL_SIZE;
        let y = self.min_row * CELL_SIZE;
        let x_end = ((self.max_col + 1) * CELL_SIZE).min(width);
        let y_end = ((self.max_row + 1) * CELL_SIZE).min(height);
        BoundingBox::new(x, y, x_end - x, y_end - y)
    }
}

impl ActivityGrid {
    fn build(previous: &GrayImage, current: &GrayImage) -> Self {
        let (width, height) = current.dimensions();
        let cols = width.div_ceil(CELL_SIZE);
        let rows = height.div_ceil(CELL_SIZE);
        let mut changed = vec![0u32; (cols * rows) as usize];
        let mut totals = vec![0u32; (cols * rows) as usize];

        for (x, y, pixel) in current.enumerate_pixels() {
            let cell = ((y / CELL_SIZE) * cols + x / CELL_SIZE) as usize;
            totals[cell] += 1;
            let before = previous.get_pixel(x, y).0[0];
            if pixel.0[0].abs_diff(before) > PIXEL_DIFF_THRESHOLD {
                changed[cell] += 1;
            }
        }

        let active = changed
            .iter()
            .zip(&totals)
            .map(|(&c, &t)| t > 0 && c as f32 / t as f32 >= CELL_ACTIVE_RATIO)
            .collect();
        Self { cols, rows, active }
    }

    fn regions(&self) -> Vec<Region> {
        let mut seen = vec![false; self.active.len()];
        let mut regions = Vec::new();
        let mut queue = VecDeque::new();

        for start in 0..self.active.len() {
            if !self.active[start] || seen[start] {
                continue;
            }
            seen[start] = true;
            queue.push_back(start);
            let (c, r) = self.coords(start);
            let mut region = Region {
                cells: 0,
                min_col: c,
                min_row: r,
                max_col: c,
                max_row: r,
            };

            while let Some(idx) = queue.pop_front() {
                let (col, row) = self.coords(idx);
                region.cells += 1;
                region.min_col = region.min_col.min(col);
                region.min_row = region.min_row.min(row);
                region.max_col = region.max_col.max(col);
                region.max_row = region.max_row.max(row);

                for next in self.neighbours(col, row) {
                    if self.active[next] && !seen[next] {
                        seen[next] = true;
                        queue.push_back(next);
                    }
                }
            }
            regions.push(region);
        }
        regions
    }

    fn coords(&self, idx: usize) -> (u32, u32) {
        (idx as u32 % self.cols, idx as u32 / self.cols)
    }

    fn neighbours(&self, col: u32, row: u32) -> impl Iterator<Item = usize> + '_ {
        let candidates = [
            (col.checked_sub(1), Some(row)),
            (Some(col + 1).filter(|&c| c < self.cols), Some(row)),
            (Some(col), row.checked_sub(1)),
            (Some(col), Some(row + 1).filter(|&r| r < self.rows)),
        ];
        candidates.into_iter().filter_map(move |(c, r)| {
            let (c, r) = (c?, r?);
            Some((r * self.cols + c) as usize)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn params() -> DetectorParams {
        DetectorParams {
            scale_factor: 1.1,
            min_neighbors: 4,
            min_box_size: 16,
        }
    }

    fn with_square(x0: u32, y0: u32, side: u32) -> GrayImage {
        let mut image = GrayImage::from_pixel(96, 64, Luma([20]));
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                image.put_pixel(x, y, Luma([220]));
            }
        }
        image
    }

    #[test]
    fn first_frame_is_reference_only() -> Result<()> {
        let mut backend = CpuBackend::new();
        assert!(backend.detect(&with_square(8, 8, 32), &params())?.is_empty());
        Ok(())
    }

    #[test]
    fn cpu_backend_detects_appearing_object() -> Result<()> {
        let mut backend = CpuBackend::new();
        let empty = GrayImage::from_pixel(96, 64, Luma([20]));
        backend.detect(&empty, &params())?;

        let boxes = backend.detect(&with_square(16, 16, 32), &params())?;
        assert_eq!(boxes, vec![BoundingBox::new(16, 16, 32, 32)]);

        // Static scene afterwards: nothing changes, nothing reported.
        let boxes = backend.detect(&with_square(16, 16, 32), &params())?;
        assert!(boxes.is_empty());
        Ok(())
    }

    #[test]
    fn small_changes_are_filtered() -> Result<()> {
        let mut backend = CpuBackend::new();
        let empty = GrayImage::from_pixel(96, 64, Luma([20]));
        backend.detect(&empty, &params())?;

        let boxes = backend.detect(&with_square(0, 0, 8), &params())?;
        assert!(boxes.is_empty());
        Ok(())
    }

    #[test]
    fn size_change_resets_reference() -> Result<()> {
        let mut backend = CpuBackend::new();
        backend.detect(&GrayImage::from_pixel(32, 32, Luma([0])), &params())?;
        let boxes = backend.detect(&with_square(16, 16, 32), &params())?;
        assert!(boxes.is_empty());
        Ok(())
    }
}
