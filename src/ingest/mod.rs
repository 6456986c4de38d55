//! Frame ingestion sources.
//!
//! This module provides different sources for frames:
//! - Synthetic scenes (`stub://`), for tests and dry runs
//! - Local video files decoded through ffmpeg
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! Every source is a pull-based `FrameSource`: each `next_frame` call blocks
//! until a frame is available, which is the only suspension point of the
//! recorder loop. Sources are not restartable.

pub mod file;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::error::SourceError;
use crate::frame::Frame;

pub use file::{FileConfig, FileSource};
pub use synthetic::{SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Source};

/// Producer of frames.
pub trait FrameSource: Send {
    /// Block until the next frame is available.
    fn next_frame(&mut self) -> std::result::Result<Frame, SourceError>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> std::result::Result<Frame, SourceError> {
        (**self).next_frame()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Adapts any frame iterator into a source; iterator end is end of stream.
pub struct IterSource<I> {
    frames: I,
    label: String,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = Frame> + Send,
{
    pub fn new(frames: I) -> Self {
        Self {
            frames,
            label: "iterator".to_string(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

impl<I> FrameSource for IterSource<I>
where
    I: Iterator<Item = Frame> + Send,
{
    fn next_frame(&mut self) -> std::result::Result<Frame, SourceError> {
        self.frames.next().ok_or(SourceError::EndOfStream)
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// Capture geometry requested from a source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceSettings {
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            target_fps: 15,
        }
    }
}

/// Open a source from a URI.
///
/// - `stub://<name>[?presence=a-b,c-d&frames=n]`: synthetic scene
/// - `/dev/videoN`: V4L2 device (feature: ingest-v4l2)
/// - `file:<path>` or a plain path: local video file
pub fn open_source(uri: &str, settings: SourceSettings) -> Result<Box<dyn FrameSource>> {
    if uri.starts_with("stub://") {
        let config = SyntheticConfig::from_uri(uri, settings)?;
        return Ok(Box::new(SyntheticSource::new(config)));
    }
    if uri.starts_with("/dev/video") {
        #[cfg(feature = "ingest-v4l2")]
        {
            let mut source = V4l2Source::new(V4l2Config {
                device: uri.to_string(),
                target_fps: settings.target_fps,
                width: settings.width,
                height: settings.height,
            })?;
            source.connect()?;
            return Ok(Box::new(source));
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            anyhow::bail!("V4L2 capture requires the ingest-v4l2 feature")
        }
    }
    let path = uri.strip_prefix("file:").unwrap_or(uri);
    let source = FileSource::open(FileConfig {
        path: path.to_string(),
        width: settings.width,
        height: settings.height,
    })?;
    Ok(Box::new(source))
}
