//! Idle ⇄ Recording state machine.
//!
//! The machine is the sole owner of the open session. It opens a session on
//! the first present frame while idle, closes it once the hysteresis window
//! has passed since the last present frame, and writes every frame in
//! between, sampled or not.

use std::time::{Duration, Instant, SystemTime};

use crate::error::RecorderError;
use crate::frame::{Frame, FrameSize};
use crate::presence::PresenceSnapshot;
use crate::recorder::session::{RecordingSession, SessionId, SessionNamer};
use crate::sink::VideoSink;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecorderState {
    #[default]
    Idle,
    Recording,
}

impl std::fmt::Display for RecorderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecorderState::Idle => f.write_str("idle"),
            RecorderState::Recording => f.write_str("recording"),
        }
    }
}

/// Subscriber for state changes (notifications, webhooks, LEDs).
pub trait TransitionObserver: Send {
    fn on_transition(&mut self, old: RecorderState, new: RecorderState, session: Option<&SessionId>);
}

impl<F> TransitionObserver for F
where
    F: FnMut(RecorderState, RecorderState, Option<&SessionId>) + Send,
{
    fn on_transition(&mut self, old: RecorderState, new: RecorderState, session: Option<&SessionId>) {
        self(old, new, session)
    }
}

/// A state change produced by one evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    Started(SessionId),
    Stopped(SessionId),
}

/// Result of `RecordingStateMachine::evaluate`.
#[derive(Debug, Default)]
pub struct Evaluation {
    pub transition: Option<Transition>,
    /// Set when a session should have started but could not be opened.
    pub open_error: Option<RecorderError>,
}

/// Result of handing a frame to the machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    NotRecording,
    Written,
    /// The write failed; the session stays open.
    Failed,
    /// The writer died under the session, which was closed. `never_started`
    /// is set when it never accepted a frame; that counts as an open failure.
    WriterLost {
        session: SessionId,
        never_started: bool,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub open_failures: u64,
    pub frames_written: u64,
    pub write_failures: u64,
    /// Sessions closed because their writer stopped accepting frames.
    pub writers_lost: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordingSettings {
    pub hysteresis_window: Duration,
    pub fps: f64,
    pub frame_size: FrameSize,
}

pub struct RecordingStateMachine {
    sink: Box<dyn VideoSink>,
    namer: SessionNamer,
    settings: RecordingSettings,
    state: RecorderState,
    session: Option<RecordingSession>,
    observers: Vec<Box<dyn TransitionObserver>>,
    stats: RecorderStats,
}

impl RecordingStateMachine {
    pub fn new(sink: Box<dyn VideoSink>, namer: SessionNamer, settings: RecordingSettings) -> Self {
        Self {
            sink,
            namer,
            settings,
            state: RecorderState::Idle,
            session: None,
            observers: Vec::new(),
            stats: RecorderStats::default(),
        }
    }

    pub fn add_observer(&mut self, observer: impl TransitionObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    pub fn stats(&self) -> RecorderStats {
        self.stats
    }

    pub fn settings(&self) -> &RecordingSettings {
        &self.settings
    }

    /// Apply this cycle's presence to the state.
    ///
    /// `last_detection` is the tracker's last positive instant; `now` is the
    /// monotonic time of this cycle and `wall` names new sessions.
    pub fn evaluate(
        &mut self,
        snapshot: &PresenceSnapshot,
        last_detection: Option<Instant>,
        now: Instant,
        wall: SystemTime,
    ) -> Evaluation {
        let mut evaluation = Evaluation::default();

        if self.state == RecorderState::Idle && snapshot.detected_this_frame {
            match self.open_session(now, wall) {
                Ok(id) => evaluation.transition = Some(Transition::Started(id)),
                Err(err) => evaluation.open_error = Some(err),
            }
        }

        if self.state == RecorderState::Recording && self.window_elapsed(last_detection, now) {
            if let Some(id) = self.close_session() {
                log::info!(
                    "recording stopped: {} (no presence for {:?})",
                    id,
                    self.settings.hysteresis_window
                );
                evaluation.transition = Some(Transition::Stopped(id));
            }
        }

        evaluation
    }

    /// Append `frame` to the open session, if any. Failures are counted and
    /// logged; the session stays open unless the writer reports itself dead.
    pub fn write_frame(&mut self, frame: &Frame) -> WriteOutcome {
        let Some(session) = self.session.as_mut() else {
            return WriteOutcome::NotRecording;
        };
        let err = match session.writer.write(frame) {
            Ok(()) => {
                session.frames_written += 1;
                self.stats.frames_written += 1;
                return WriteOutcome::Written;
            }
            Err(err) => err,
        };

        session.write_failures += 1;
        self.stats.write_failures += 1;
        if session.writer.is_open() {
            log::warn!(
                "frame write failed for {} ({} failures this session): {:#}",
                session.id,
                session.write_failures,
                err
            );
            return WriteOutcome::Failed;
        }

        let never_started = session.frames_written == 0;
        log::error!("writer for {} is gone: {:#}", session.id, err);
        self.stats.writers_lost += 1;
        if never_started {
            self.stats.open_failures += 1;
        }
        match self.close_session() {
            Some(session) => WriteOutcome::WriterLost {
                session,
                never_started,
            },
            None => WriteOutcome::Failed,
        }
    }

    /// Close any open session. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        if let Some(id) = self.close_session() {
            log::info!("recording finalized on shutdown: {}", id);
        }
    }

    fn window_elapsed(&self, last_detection: Option<Instant>, now: Instant) -> bool {
        match last_detection {
            Some(last) => now.saturating_duration_since(last) >= self.settings.hysteresis_window,
            None => true,
        }
    }

    fn open_session(&mut self, now: Instant, wall: SystemTime) -> Result<SessionId, RecorderError> {
        let id = match self.namer.propose(wall) {
            Ok(id) => id,
            Err(err) => {
                self.stats.open_failures += 1;
                log::error!("could not name a new recording: {:#}", err);
                return Err(RecorderError::WriterOpen {
                    session: "<unnamed>".to_string(),
                    reason: format!("{:#}", err),
                });
            }
        };

        let writer = match self
            .sink
            .open(&id, self.settings.fps, self.settings.frame_size)
        {
            Ok(writer) => writer,
            Err(err) => {
                self.stats.open_failures += 1;
                log::error!("could not start recording {}: {:#}", id, err);
                return Err(RecorderError::WriterOpen {
                    session: id.to_string(),
                    reason: format!("{:#}", err),
                });
            }
        };

        self.namer.commit(&id);
        log::info!("recording started: {}", id);
        self.session = Some(RecordingSession::new(id.clone(), writer, now));
        self.stats.sessions_opened += 1;
        self.set_state(RecorderState::Recording, Some(&id));
        Ok(id)
    }

    fn close_session(&mut self) -> Option<SessionId> {
        let mut session = self.session.take()?;
        session.writer.close();
        self.stats.sessions_closed += 1;
        if session.write_failures > 0 {
            log::warn!(
                "{} closed with {} failed writes out of {}",
                session.id,
                session.write_failures,
                session.frames_written + session.write_failures
            );
        }
        self.set_state(RecorderState::Idle, Some(&session.id));
        Some(session.id)
    }

    fn set_state(&mut self, new: RecorderState, session: Option<&SessionId>) {
        let old = std::mem::replace(&mut self.state, new);
        if old == new {
            return;
        }
        for observer in &mut self.observers {
            observer.on_transition(old, new, session);
        }
    }
}

impl Drop for RecordingStateMachine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use crate::sink::MemorySink;
    use std::sync::{Arc, Mutex};
    use std::time::UNIX_EPOCH;

    fn machine(sink: &MemorySink, window_secs: u64) -> RecordingStateMachine {
        RecordingStateMachine::new(
            Box::new(sink.clone()),
            SessionNamer::new("motion", "avi"),
            RecordingSettings {
                hysteresis_window: Duration::from_secs(window_secs),
                fps: 15.0,
                frame_size: FrameSize::new(8, 8),
            },
        )
    }

    fn present() -> PresenceSnapshot {
        PresenceSnapshot {
            boxes: vec![BoundingBox::new(1, 1, 2, 2)],
            detected_this_frame: true,
            sampled: true,
        }
    }

    fn absent() -> PresenceSnapshot {
        PresenceSnapshot::default()
    }

    fn wall(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
    }

    #[test]
    fn starts_idle_and_opens_on_presence() {
        let sink = MemorySink::new();
        let mut sm = machine(&sink, 5);
        let t0 = Instant::now();
        assert_eq!(sm.state(), RecorderState::Idle);

        let eval = sm.evaluate(&absent(), None, t0, wall(0));
        assert!(eval.transition.is_none());
        assert_eq!(sm.write_frame(&Frame::filled(8, 8, [0; 3]).unwrap()), WriteOutcome::NotRecording);

        let eval = sm.evaluate(&present(), Some(t0), t0, wall(0));
        assert!(matches!(eval.transition, Some(Transition::Started(_))));
        assert_eq!(sm.state(), RecorderState::Recording);
        assert_eq!(sink.sessions()[0].id.file_name(), "motion_1700000000.avi");
    }

    #[test]
    fn closes_exactly_at_window() {
        let sink = MemorySink::new();
        let mut sm = machine(&sink, 5);
        let t0 = Instant::now();
        sm.evaluate(&present(), Some(t0), t0, wall(0));

        let almost = t0 + Duration::from_millis(4_999);
        assert!(sm.evaluate(&absent(), Some(t0), almost, wall(4)).transition.is_none());
        assert_eq!(sm.state(), RecorderState::Recording);

        let eval = sm.evaluate(&absent(), Some(t0), t0 + Duration::from_secs(5), wall(5));
        assert!(matches!(eval.transition, Some(Transition::Stopped(_))));
        assert_eq!(sm.state(), RecorderState::Idle);
        assert!(sink.sessions()[0].closed);
    }

    #[test]
    fn open_failure_stays_idle() {
        let sink = MemorySink::new();
        sink.fail_next_opens(1);
        let mut sm = machine(&sink, 5);
        let t0 = Instant::now();

        let eval = sm.evaluate(&present(), Some(t0), t0, wall(0));
        assert!(matches!(eval.open_error, Some(RecorderError::WriterOpen { .. })));
        assert_eq!(sm.state(), RecorderState::Idle);
        assert_eq!(sm.stats().open_failures, 1);
        assert!(sink.sessions().is_empty());
    }

    #[test]
    fn write_failures_keep_session_open() {
        let sink = MemorySink::new();
        let mut sm = machine(&sink, 5);
        let t0 = Instant::now();
        sm.evaluate(&present(), Some(t0), t0, wall(0));

        sink.fail_writes(true);
        let frame = Frame::filled(8, 8, [0; 3]).unwrap();
        assert_eq!(sm.write_frame(&frame), WriteOutcome::Failed);
        sink.fail_writes(false);
        assert_eq!(sm.write_frame(&frame), WriteOutcome::Written);

        assert_eq!(sm.state(), RecorderState::Recording);
        let session = sm.session().expect("open session");
        assert_eq!(session.write_failures(), 1);
        assert_eq!(session.frames_written(), 1);
        assert_eq!(sm.stats().write_failures, 1);
    }

    #[test]
    fn observers_see_both_transitions() {
        let sink = MemorySink::new();
        let mut sm = machine(&sink, 1);
        let seen: Arc<Mutex<Vec<(RecorderState, RecorderState, Option<String>)>>> =
            Arc::default();
        let log = seen.clone();
        sm.add_observer(move |old: RecorderState, new: RecorderState, id: Option<&SessionId>| {
            log.lock()
                .unwrap()
                .push((old, new, id.map(|id| id.file_name().to_string())));
        });

        let t0 = Instant::now();
        sm.evaluate(&present(), Some(t0), t0, wall(0));
        sm.evaluate(&absent(), Some(t0), t0 + Duration::from_secs(1), wall(1));

        let seen = seen.lock().unwrap();
        let name = Some("motion_1700000000.avi".to_string());
        assert_eq!(
            *seen,
            vec![
                (RecorderState::Idle, RecorderState::Recording, name.clone()),
                (RecorderState::Recording, RecorderState::Idle, name),
            ]
        );
    }

    #[test]
    fn shutdown_closes_open_session_once() {
        let sink = MemorySink::new();
        let mut sm = machine(&sink, 5);
        let t0 = Instant::now();
        sm.evaluate(&present(), Some(t0), t0, wall(0));

        sm.shutdown();
        sm.shutdown();
        drop(sm);

        let sessions = sink.sessions();
        assert!(sessions[0].closed);
        assert_eq!(sessions[0].close_calls, 1);
    }

    #[test]
    fn unnamed_session_counts_as_open_failure() {
        let sink = MemorySink::new();
        let mut sm = machine(&sink, 5);
        let t0 = Instant::now();
        let before_epoch = UNIX_EPOCH - Duration::from_secs(1);

        let eval = sm.evaluate(&present(), Some(t0), t0, before_epoch);
        assert!(matches!(eval.open_error, Some(RecorderError::WriterOpen { .. })));
        assert_eq!(sm.stats().open_failures, 1);
        assert_eq!(sm.state(), RecorderState::Idle);
    }

    #[test]
    fn failed_open_does_not_use_up_the_name() {
        let sink = MemorySink::new();
        sink.fail_next_opens(1);
        let mut sm = machine(&sink, 5);
        let t0 = Instant::now();

        sm.evaluate(&present(), Some(t0), t0, wall(0));
        sm.evaluate(&present(), Some(t0), t0, wall(0));
        assert_eq!(sm.state(), RecorderState::Recording);
        assert_eq!(sink.sessions()[0].id.file_name(), "motion_1700000000.avi");
    }

    #[test]
    fn dead_writer_closes_session_as_failed_open() {
        let sink = MemorySink::new();
        let mut sm = machine(&sink, 5);
        let t0 = Instant::now();
        sm.evaluate(&present(), Some(t0), t0, wall(0));

        sink.kill_writers(true);
        let frame = Frame::filled(8, 8, [0; 3]).unwrap();
        let outcome = sm.write_frame(&frame);
        assert!(matches!(
            outcome,
            WriteOutcome::WriterLost {
                never_started: true,
                ..
            }
        ));
        assert_eq!(sm.state(), RecorderState::Idle);
        assert!(sm.session().is_none());
        let stats = sm.stats();
        assert_eq!(stats.open_failures, 1);
        assert_eq!(stats.writers_lost, 1);
        assert_eq!(stats.sessions_closed, 1);
        assert!(sink.sessions()[0].closed);
    }

    #[test]
    fn writer_dying_mid_session_is_not_an_open_failure() {
        let sink = MemorySink::new();
        let mut sm = machine(&sink, 5);
        let t0 = Instant::now();
        sm.evaluate(&present(), Some(t0), t0, wall(0));
        let frame = Frame::filled(8, 8, [0; 3]).unwrap();
        assert_eq!(sm.write_frame(&frame), WriteOutcome::Written);

        sink.kill_writers(true);
        assert!(matches!(
            sm.write_frame(&frame),
            WriteOutcome::WriterLost {
                never_started: false,
                ..
            }
        ));
        assert_eq!(sm.stats().open_failures, 0);
        assert_eq!(sm.stats().writers_lost, 1);
    }
}
