//! Synthetic frame source.
//!
//! Produces a static textured background. During scripted presence ranges a
//! white, swaying rectangle is painted over it, which both the stub
//! (brightness) and cpu (frame difference) detectors pick up.

use anyhow::{anyhow, Context, Result};
use std::ops::Range;
use std::time::{Duration, Instant};

use super::{FrameSource, SourceSettings};
use crate::error::SourceError;
use crate::frame::Frame;

/// Configuration for a synthetic source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Pace output to this rate when `realtime` is set.
    pub target_fps: u32,
    /// Frame index ranges during which the scene contains a subject.
    pub presence: Vec<Range<u64>>,
    /// End the stream after this many frames.
    pub max_frames: Option<u64>,
    pub realtime: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "camera".to_string(),
            width: 800,
            height: 600,
            target_fps: 15,
            presence: Vec::new(),
            max_frames: None,
            realtime: false,
        }
    }
}

impl SyntheticConfig {
    /// Parse `stub://<name>[?presence=a-b,c-d&frames=n]`. Sources opened from
    /// a URI are paced in real time.
    pub fn from_uri(uri: &str, settings: SourceSettings) -> Result<Self> {
        let rest = uri
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("not a stub:// uri: {}", uri))?;
        let (name, query) = rest.split_once('?').unwrap_or((rest, ""));

        let mut config = Self {
            name: if name.is_empty() { "camera" } else { name }.to_string(),
            width: settings.width,
            height: settings.height,
            target_fps: settings.target_fps,
            realtime: true,
            ..Self::default()
        };

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed stub parameter '{}'", pair))?;
            match key {
                "presence" => config.presence = parse_ranges(value)?,
                "frames" => {
                    config.max_frames = Some(
                        value
                            .parse()
                            .with_context(|| format!("invalid frame count '{}'", value))?,
                    )
                }
                other => return Err(anyhow!("unknown stub parameter '{}'", other)),
            }
        }
        Ok(config)
    }
}

/// Parse `a-b,c-d` into half-open ranges `a..b`.
fn parse_ranges(value: &str) -> Result<Vec<Range<u64>>> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (start, end) = entry
                .split_once('-')
                .ok_or_else(|| anyhow!("presence range '{}' must look like a-b", entry))?;
            let start: u64 = start.parse().with_context(|| format!("range start '{}'", start))?;
            let end: u64 = end.parse().with_context(|| format!("range end '{}'", end))?;
            if end <= start {
                return Err(anyhow!("empty presence range '{}'", entry));
            }
            Ok(start..end)
        })
        .collect()
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    background: Vec<u8>,
    frame_count: u64,
    next_due: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        let background = background(config.width, config.height);
        log::info!(
            "SyntheticSource: {} ({}x{}, {} presence ranges)",
            config.name,
            config.width,
            config.height,
            config.presence.len()
        );
        Self {
            config,
            background,
            frame_count: 0,
            next_due: None,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn subject_present(&self, index: u64) -> bool {
        self.config.presence.iter().any(|r| r.contains(&index))
    }

    fn pace(&mut self) {
        if !self.config.realtime || self.config.target_fps == 0 {
            return;
        }
        let period = Duration::from_secs_f64(1.0 / self.config.target_fps as f64);
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + period);
    }

    fn render(&self, index: u64) -> Vec<u8> {
        let mut pixels = self.background.clone();
        if !self.subject_present(index) {
            return pixels;
        }
        let (w, h) = (self.config.width, self.config.height);
        let side = (w.min(h) / 4).max(1);
        let drift = ((index % 16) as u32) * (w / 32).max(1);
        let x0 = (w / 3 + drift).min(w.saturating_sub(side));
        let y0 = h / 3;
        for y in y0..(y0 + side).min(h) {
            for x in x0..(x0 + side).min(w) {
                let i = ((y * w + x) * 3) as usize;
                pixels[i..i + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Frame, SourceError> {
        if self
            .config
            .max_frames
            .is_some_and(|max| self.frame_count >= max)
        {
            return Err(SourceError::EndOfStream);
        }
        self.pace();

        let index = self.frame_count;
        self.frame_count += 1;
        Frame::rgb(self.render(index), self.config.width, self.config.height)
            .map_err(SourceError::fatal)
    }

    fn describe(&self) -> String {
        format!("stub://{}", self.config.name)
    }
}

/// Static texture kept below the stub detector's presence level.
fn background(width: u32, height: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            let v = (((x / 8 + y / 8) % 4) * 40 + 30) as u8;
            pixels.extend_from_slice(&[v, v, v]);
        }
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::STUB_PRESENCE_LEVEL;

    fn config(presence: Vec<Range<u64>>, max_frames: Option<u64>) -> SyntheticConfig {
        SyntheticConfig {
            width: 64,
            height: 48,
            presence,
            max_frames,
            ..SyntheticConfig::default()
        }
    }

    #[test]
    fn parses_presence_and_frame_limit() -> Result<()> {
        let cfg = SyntheticConfig::from_uri(
            "stub://porch?presence=50-80,200-210&frames=300",
            SourceSettings::default(),
        )?;
        assert_eq!(cfg.name, "porch");
        assert_eq!(cfg.presence, vec![50..80, 200..210]);
        assert_eq!(cfg.max_frames, Some(300));
        assert!(cfg.realtime);
        Ok(())
    }

    #[test]
    fn rejects_bad_parameters() {
        let settings = SourceSettings::default();
        assert!(SyntheticConfig::from_uri("stub://x?presence=9-3", settings).is_err());
        assert!(SyntheticConfig::from_uri("stub://x?color=red", settings).is_err());
        assert!(SyntheticConfig::from_uri("stub://x?frames", settings).is_err());
    }

    #[test]
    fn subject_only_painted_inside_ranges() -> Result<()> {
        let mut source = SyntheticSource::new(config(vec![1..2], Some(3)));
        let bright = |f: &Frame| f.pixels().iter().any(|&p| p >= STUB_PRESENCE_LEVEL);

        assert!(!bright(&source.next_frame()?));
        assert!(bright(&source.next_frame()?));
        assert!(!bright(&source.next_frame()?));
        assert!(matches!(source.next_frame(), Err(SourceError::EndOfStream)));
        assert_eq!(source.frames_captured(), 3);
        Ok(())
    }
}
