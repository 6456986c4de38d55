//! Presence tracking.
//!
//! Turns throttled detector output into a per-frame presence signal. Boxes are
//! sticky between sampled frames; the last-seen instant moves only when a
//! frame reports presence.

use std::time::Instant;

use crate::detect::{DetectionResult, DetectionSampler};
use crate::frame::Frame;

/// Presence as seen by one cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PresenceSnapshot {
    /// Latest boxes in full-resolution coordinates.
    pub boxes: DetectionResult,
    pub detected_this_frame: bool,
    /// True when the detector actually ran on this frame.
    pub sampled: bool,
}

pub struct PresenceTracker {
    sampler: DetectionSampler,
    last_detection_boxes: DetectionResult,
    last_detection_instant: Option<Instant>,
}

impl PresenceTracker {
    pub fn new(sampler: DetectionSampler) -> Self {
        Self {
            sampler,
            last_detection_boxes: Vec::new(),
            last_detection_instant: None,
        }
    }

    /// Sample (if due) and report presence for `frame_index`.
    pub fn update(&mut self, frame_index: u64, frame: &Frame, now: Instant) -> PresenceSnapshot {
        let sampled = match self.sampler.sample(frame_index, frame) {
            Some(boxes) => {
                self.last_detection_boxes = boxes;
                true
            }
            None => false,
        };

        let detected_this_frame = !self.last_detection_boxes.is_empty();
        if detected_this_frame {
            // Never move backwards, even if a caller hands us a stale instant.
            self.last_detection_instant = Some(match self.last_detection_instant {
                Some(prev) if prev > now => prev,
                _ => now,
            });
        }

        PresenceSnapshot {
            boxes: self.last_detection_boxes.clone(),
            detected_this_frame,
            sampled,
        }
    }

    /// Instant of the most recent positive frame, if any.
    pub fn last_detection_instant(&self) -> Option<Instant> {
        self.last_detection_instant
    }

    pub fn last_detection_boxes(&self) -> &DetectionResult {
        &self.last_detection_boxes
    }

    pub fn sampler(&self) -> &DetectionSampler {
        &self.sampler
    }
}
