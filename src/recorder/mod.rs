//! Recording sessions, the idle/recording state machine and the loop that
//! drives them.

mod controller;
mod session;
mod state;

pub use controller::{Controller, ControllerConfig, CycleOutcome, RunSummary, StopReason};
pub use session::{RecordingSession, SessionId, SessionNamer};
pub use state::{
    Evaluation, RecorderState, RecorderStats, RecordingSettings, RecordingStateMachine,
    Transition, TransitionObserver, WriteOutcome,
};
