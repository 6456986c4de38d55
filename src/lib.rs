//! Presence-triggered video recorder
//!
//! This crate records a fixed camera feed only while something is in view.
//!
//! # Architecture
//!
//! Every frame runs through one cycle on a single thread:
//!
//! 1. **Acquire**: a `FrameSource` blocks until the next frame is available.
//! 2. **Sample**: every Nth frame is downscaled, converted to grayscale and
//!    handed to a `DetectorBackend`; boxes are rescaled to full resolution.
//! 3. **Track**: `PresenceTracker` keeps the latest boxes and the instant of
//!    the last positive detection.
//! 4. **Decide**: `RecordingStateMachine` opens a session on presence and
//!    closes it once nothing was seen for the hysteresis window.
//! 5. **Write**: while recording, the frame (with box overlay) goes to the
//!    session's `SessionWriter`.
//!
//! # Module Structure
//!
//! - `frame`: RGB/gray frame buffers, downscaling, box overlay
//! - `ingest`: Frame sources (synthetic, local files, V4L2)
//! - `detect`: Detector backends (cpu, stub, ONNX via tract) and the throttled sampler
//! - `presence`: Sticky presence signal
//! - `recorder`: Sessions, state machine, controller loop
//! - `sink`: Video writers (ffmpeg, in-memory)
//! - `config`: Daemon configuration

pub mod clock;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod presence;
pub mod recorder;
pub mod sink;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::PresencedConfig;
pub use detect::{
    backend_by_name, BackendOptions, BoundingBox, CpuBackend, DetectionResult, DetectionSampler,
    DetectorBackend, DetectorParams, SamplerConfig, StubBackend,
};
#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
pub use error::{RecorderError, SourceError};
pub use frame::{Frame, FrameSize, PixelFormat};
pub use ingest::{open_source, FileConfig, FileSource, FrameSource, IterSource, SourceSettings};
pub use ingest::{SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use ingest::{V4l2Config, V4l2Source};
pub use presence::{PresenceSnapshot, PresenceTracker};
pub use recorder::{
    Controller, ControllerConfig, CycleOutcome, RecorderState, RecorderStats, RunSummary,
    SessionId, StopReason, Transition, TransitionObserver, WriteOutcome,
};
pub use sink::{FfmpegSink, MemorySink, SessionWriter, VideoSink};
