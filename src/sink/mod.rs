//! Video sinks.
//!
//! A `VideoSink` opens one `SessionWriter` per recording session. The writer
//! accepts frames until it is closed; closing finalizes the file so that it
//! is playable.
//!
//! - `FfmpegSink`: encodes through an `ffmpeg` subprocess.
//! - `MemorySink`: keeps sessions in memory (tests, dry runs).

use anyhow::Result;

use crate::frame::{Frame, FrameSize};
use crate::recorder::SessionId;

mod ffmpeg;
mod memory;

pub use ffmpeg::{FfmpegSink, FfmpegWriter};
pub use memory::{MemorySink, RecordedSession};

/// Writer for one open session.
pub trait SessionWriter: Send {
    /// Append a frame.
    fn write(&mut self, frame: &Frame) -> Result<()>;

    /// Finalize the output. Calling `close` on a closed writer does nothing.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Factory for session writers.
pub trait VideoSink: Send {
    fn open(
        &mut self,
        session: &SessionId,
        fps: f64,
        frame_size: FrameSize,
    ) -> Result<Box<dyn SessionWriter>>;
}

impl<S: VideoSink + ?Sized> VideoSink for Box<S> {
    fn open(
        &mut self,
        session: &SessionId,
        fps: f64,
        frame_size: FrameSize,
    ) -> Result<Box<dyn SessionWriter>> {
        (**self).open(session, fps, frame_size)
    }
}
