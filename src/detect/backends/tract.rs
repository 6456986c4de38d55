#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::GrayImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, DetectorParams};

/// Overlap above which the weaker of two candidates is dropped.
const NMS_IOU_THRESHOLD: f32 = 0.3;

/// Tract-based face/person detector for ONNX models.
///
/// The model takes a `1x3xHxW` f32 tensor in `[0, 1]`; the gray detection
/// frame is resized to `WxH` and replicated into all three channels.
/// Two output layouts are understood, both with box corners normalized to
/// `[0, 1]`:
///
/// - two outputs, `scores [1, N, C]` (last column is the positive class) and
///   `boxes [1, N, 4]` as `x1, y1, x2, y2` (UltraFace style);
/// - one output of rows `x1, y1, x2, y2, score, ...`.
///
/// Loads a local model file only; no network I/O.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    width: u32,
    height: u32,
    confidence_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("model input size {}x{} is empty", width, height));
        }
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            confidence_threshold: 0.7,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, image: &GrayImage) -> Tensor {
        let resized;
        let image = if image.dimensions() == (self.width, self.height) {
            image
        } else {
            resized = imageops::resize(image, self.width, self.height, FilterType::Triangle);
            &resized
        };
        tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, _, y, x)| image.get_pixel(x as u32, y as u32)[0] as f32 / 255.0,
        )
        .into_tensor()
    }

    fn run(&self, input: Tensor) -> Result<Vec<Candidate>> {
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        match outputs.len() {
            0 => Err(anyhow!("model produced no outputs")),
            1 => {
                let (rows, row_len) = flatten(&outputs[0])?;
                candidates_from_rows(&rows, row_len)
            }
            _ => {
                let (scores, classes) = flatten(&outputs[0])?;
                let (boxes, _) = flatten(&outputs[1])?;
                candidates_from_pair(&scores, classes, &boxes)
            }
        }
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, image: &GrayImage, params: &DetectorParams) -> Result<Vec<BoundingBox>> {
        let input = self.build_input(image);
        let candidates = self
            .run(input)?
            .into_iter()
            .filter(|c| c.score >= self.confidence_threshold)
            .collect();
        Ok(non_max_suppression(candidates, NMS_IOU_THRESHOLD)
            .iter()
            .filter_map(|c| c.to_frame_box(image.width(), image.height()))
            .filter(|b| b.width >= params.min_box_size && b.height >= params.min_box_size)
            .collect())
    }

    fn warm_up(&mut self) -> Result<()> {
        let input = Tensor::zero::<f32>(&[1, 3, self.height as usize, self.width as usize])
            .context("failed to allocate warm-up tensor")?;
        self.run(input).map(|_| ())
    }
}

/// Output tensor as a flat row-major buffer plus its innermost length.
fn flatten(output: &TValue) -> Result<(Vec<f32>, usize)> {
    let view = output
        .to_array_view::<f32>()
        .context("model output tensor was not f32")?;
    let row_len = view.shape().last().copied().unwrap_or(0);
    Ok((view.iter().copied().collect(), row_len))
}

/// Candidate in normalized model coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = w * h;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Clamp to the frame and convert to pixels. `None` for empty boxes.
    fn to_frame_box(self, width: u32, height: u32) -> Option<BoundingBox> {
        let px = |v: f32, dim: u32| (v.clamp(0.0, 1.0) * dim as f32) as u32;
        let (x1, y1) = (px(self.x1, width), px(self.y1, height));
        let (x2, y2) = (px(self.x2, width), px(self.y2, height));
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(BoundingBox::new(x1, y1, x2 - x1, y2 - y1))
    }
}

fn candidates_from_pair(scores: &[f32], classes: usize, boxes: &[f32]) -> Result<Vec<Candidate>> {
    if classes == 0 || scores.len() % classes != 0 {
        return Err(anyhow!("score output has {} values in rows of {}", scores.len(), classes));
    }
    let count = scores.len() / classes;
    if boxes.len() != count * 4 {
        return Err(anyhow!(
            "box output has {} values, expected {} for {} candidates",
            boxes.len(),
            count * 4,
            count
        ));
    }
    Ok(scores
        .chunks_exact(classes)
        .zip(boxes.chunks_exact(4))
        .map(|(score, b)| Candidate {
            x1: b[0],
            y1: b[1],
            x2: b[2],
            y2: b[3],
            score: score[classes - 1],
        })
        .collect())
}

fn candidates_from_rows(rows: &[f32], row_len: usize) -> Result<Vec<Candidate>> {
    if row_len < 5 || rows.len() % row_len != 0 {
        return Err(anyhow!(
            "detection output rows must hold at least x1, y1, x2, y2, score (got {} values in rows of {})",
            rows.len(),
            row_len
        ));
    }
    Ok(rows
        .chunks_exact(row_len)
        .map(|r| Candidate {
            x1: r[0],
            y1: r[1],
            x2: r[2],
            y2: r[3],
            score: r[4],
        })
        .collect())
}

/// Greedy NMS: keep the best-scoring candidate, drop everything overlapping it.
fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}
