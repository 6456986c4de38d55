//! The recorder loop.
//!
//! One thread pulls a frame, samples detection, updates presence, evaluates
//! the state machine and writes the frame while a session is open. The
//! source pull is the only blocking point; shutdown is observed between
//! cycles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::detect::{DetectionSampler, DetectorBackend, SamplerConfig};
use crate::error::{RecorderError, SourceError};
use crate::frame::{Frame, FrameSize, IDLE_COLOR, OVERLAY_THICKNESS, RECORDING_COLOR};
use crate::ingest::FrameSource;
use crate::presence::{PresenceSnapshot, PresenceTracker};
use crate::recorder::session::SessionNamer;
use crate::recorder::state::{
    RecorderState, RecorderStats, RecordingSettings, RecordingStateMachine, Transition,
    TransitionObserver, WriteOutcome,
};
use crate::sink::VideoSink;

/// Everything the loop needs to know, already validated.
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    pub sampler: SamplerConfig,
    /// Recording stops once no presence was seen for this long.
    pub hysteresis_window: Duration,
    pub output_fps: f64,
    pub output_frame_size: FrameSize,
    pub output_prefix: String,
    pub output_extension: String,
    /// Draw detection boxes onto frames before they are written.
    pub draw_overlay: bool,
    /// Consecutive transient source failures tolerated before giving up.
    pub source_retry_limit: u32,
    pub health_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerConfig::default(),
            hysteresis_window: Duration::from_secs(5),
            output_fps: 15.0,
            output_frame_size: FrameSize::new(800, 600),
            output_prefix: "motion".to_string(),
            output_extension: "avi".to_string(),
            draw_overlay: true,
            source_retry_limit: 0,
            health_interval: Duration::from_secs(5),
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), RecorderError> {
        let invalid = |msg: String| Err(RecorderError::Config(msg));
        if self.sampler.interval_frames == 0 {
            return invalid("detection interval must be at least 1 frame".into());
        }
        let factor = self.sampler.downscale_factor;
        if !(factor > 0.0 && factor <= 1.0) {
            return invalid(format!("downscale factor {} is outside (0, 1]", factor));
        }
        if self.sampler.params.scale_factor <= 1.0 {
            return invalid(format!(
                "detector scale factor {} must be greater than 1",
                self.sampler.params.scale_factor
            ));
        }
        if self.hysteresis_window.is_zero() {
            return invalid("hysteresis window must be positive".into());
        }
        if !(self.output_fps.is_finite() && self.output_fps > 0.0) {
            return invalid(format!("output fps {} must be positive", self.output_fps));
        }
        if self.output_frame_size.width == 0 || self.output_frame_size.height == 0 {
            return invalid(format!("output frame size {} is empty", self.output_frame_size));
        }
        if self.output_prefix.trim().is_empty() {
            return invalid("output prefix must not be empty".into());
        }
        if self.output_extension.trim_start_matches('.').is_empty() {
            return invalid("output extension must not be empty".into());
        }
        Ok(())
    }
}

/// What one cycle did.
#[derive(Debug)]
pub struct CycleOutcome {
    pub frame_index: u64,
    /// State at the end of the cycle.
    pub state: RecorderState,
    pub snapshot: PresenceSnapshot,
    pub transition: Option<Transition>,
    pub write: WriteOutcome,
    pub detector_failed: bool,
    pub open_error: Option<RecorderError>,
}

impl CycleOutcome {
    /// The cycle completed but something was dropped on the floor.
    pub fn is_degraded(&self) -> bool {
        self.detector_failed
            || self.open_error.is_some()
            || matches!(
                self.write,
                WriteOutcome::Failed | WriteOutcome::WriterLost { .. }
            )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    FrameLimit,
    Shutdown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub stats: RecorderStats,
    pub detector_runs: u64,
    pub detector_failures: u64,
    pub stop_reason: StopReason,
}

pub struct Controller {
    config: ControllerConfig,
    source: Box<dyn FrameSource>,
    tracker: PresenceTracker,
    machine: RecordingStateMachine,
    clock: Box<dyn Clock>,
    shutdown: Arc<AtomicBool>,
    frame_index: u64,
    source_failures: u32,
    last_health_log: Instant,
}

impl Controller {
    pub fn new(
        config: ControllerConfig,
        source: Box<dyn FrameSource>,
        backend: Box<dyn DetectorBackend>,
        sink: Box<dyn VideoSink>,
        clock: Box<dyn Clock>,
    ) -> Result<Self, RecorderError> {
        config.validate()?;

        let mut backend = backend;
        backend
            .warm_up()
            .map_err(|err| RecorderError::DetectorInit {
                backend: backend.name().to_string(),
                reason: format!("{:#}", err),
            })?;
        let sampler = DetectionSampler::new(backend, config.sampler);
        let machine = RecordingStateMachine::new(
            sink,
            SessionNamer::new(&config.output_prefix, &config.output_extension),
            RecordingSettings {
                hysteresis_window: config.hysteresis_window,
                fps: config.output_fps,
                frame_size: config.output_frame_size,
            },
        );
        let last_health_log = clock.now();
        Ok(Self {
            config,
            source,
            tracker: PresenceTracker::new(sampler),
            machine,
            clock,
            shutdown: Arc::new(AtomicBool::new(false)),
            frame_index: 0,
            source_failures: 0,
            last_health_log,
        })
    }

    /// Flag checked between cycles; setting it ends `run` after the current
    /// cycle with the session closed.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn add_observer(&mut self, observer: impl TransitionObserver + 'static) {
        self.machine.add_observer(observer);
    }

    pub fn state(&self) -> RecorderState {
        self.machine.state()
    }

    pub fn stats(&self) -> RecorderStats {
        self.machine.stats()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frame_index
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Run one cycle on an already acquired frame.
    pub fn process_frame(&mut self, mut frame: Frame) -> CycleOutcome {
        let now = self.clock.now();
        let wall = self.clock.wall_now();
        let frame_index = self.frame_index;
        self.frame_index += 1;

        let failures_before = self.tracker.sampler().failures();
        let snapshot = self.tracker.update(frame_index, &frame, now);
        let detector_failed = self.tracker.sampler().failures() > failures_before;

        let evaluation = self.machine.evaluate(
            &snapshot,
            self.tracker.last_detection_instant(),
            now,
            wall,
        );
        let mut open_error = evaluation.open_error;

        if self.config.draw_overlay && !snapshot.boxes.is_empty() {
            let color = match self.machine.state() {
                RecorderState::Recording => RECORDING_COLOR,
                RecorderState::Idle => IDLE_COLOR,
            };
            frame.draw_boxes(&snapshot.boxes, color, OVERLAY_THICKNESS);
        }
        let write = self.machine.write_frame(&frame);
        if let WriteOutcome::WriterLost {
            session,
            never_started: true,
        } = &write
        {
            open_error.get_or_insert_with(|| RecorderError::WriterOpen {
                session: session.to_string(),
                reason: "encoder exited before accepting a frame".to_string(),
            });
        }
        let state = self.machine.state();

        log::debug!(
            "frame {} state={} sampled={} boxes={} write={:?}",
            frame_index,
            state,
            snapshot.sampled,
            snapshot.boxes.len(),
            write
        );

        CycleOutcome {
            frame_index,
            state,
            snapshot,
            transition: evaluation.transition,
            write,
            detector_failed,
            open_error,
        }
    }

    /// Pull one frame and process it. `Ok(None)` means the source ended.
    pub fn step(&mut self) -> Result<Option<CycleOutcome>, RecorderError> {
        loop {
            match self.source.next_frame() {
                Ok(frame) => {
                    self.source_failures = 0;
                    return Ok(Some(self.process_frame(frame)));
                }
                Err(SourceError::EndOfStream) => return Ok(None),
                Err(SourceError::Transient(reason))
                    if self.source_failures < self.config.source_retry_limit =>
                {
                    self.source_failures += 1;
                    log::warn!(
                        "{}: read failed ({}/{}): {}",
                        self.source.describe(),
                        self.source_failures,
                        self.config.source_retry_limit,
                        reason
                    );
                    self.clock.sleep(self.frame_period());
                }
                Err(err) => return Err(RecorderError::SourceExhausted(err)),
            }
        }
    }

    /// Drive cycles until the source ends, `max_frames` cycles ran, or
    /// shutdown is requested. Any open session is closed before returning,
    /// on success and on error.
    pub fn run(&mut self, max_frames: Option<u64>) -> Result<RunSummary, RecorderError> {
        log::info!(
            "recorder running: source={} detector={} interval={} window={:?}",
            self.source.describe(),
            self.tracker.sampler().backend_name(),
            self.config.sampler.interval_frames,
            self.config.hysteresis_window
        );

        let mut processed = 0u64;
        let stop_reason = loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break StopReason::Shutdown;
            }
            if max_frames.is_some_and(|max| processed >= max) {
                break StopReason::FrameLimit;
            }
            match self.step() {
                Ok(Some(_)) => processed += 1,
                Ok(None) => break StopReason::EndOfStream,
                Err(err) => {
                    log::error!("{}: {}", self.source.describe(), err);
                    self.machine.shutdown();
                    return Err(err);
                }
            }
            self.log_health_if_due();
        };

        self.machine.shutdown();
        let summary = self.summary(stop_reason);
        log::info!(
            "recorder stopped ({:?}): {} frames, {} sessions, {} open failures, {} write failures",
            summary.stop_reason,
            summary.frames,
            summary.stats.sessions_opened,
            summary.stats.open_failures,
            summary.stats.write_failures
        );
        Ok(summary)
    }

    fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.config.output_fps)
    }

    fn summary(&self, stop_reason: StopReason) -> RunSummary {
        RunSummary {
            frames: self.frame_index,
            stats: self.machine.stats(),
            detector_runs: self.tracker.sampler().runs(),
            detector_failures: self.tracker.sampler().failures(),
            stop_reason,
        }
    }

    fn log_health_if_due(&mut self) {
        let now = self.clock.now();
        if now.saturating_duration_since(self.last_health_log) < self.config.health_interval {
            return;
        }
        let stats = self.machine.stats();
        log::info!(
            "health state={} frames={} sessions={} detector_failures={} write_failures={} source={}",
            self.machine.state(),
            self.frame_index,
            stats.sessions_opened,
            self.tracker.sampler().failures(),
            stats.write_failures,
            self.source.describe()
        );
        self.last_health_log = now;
    }
}
