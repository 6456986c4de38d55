use thiserror::Error;

/// Frame source failures.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source has no more frames (file EOF, closed pipe).
    #[error("end of stream")]
    EndOfStream,
    /// A read failed but the source may recover.
    #[error("transient source failure: {0}")]
    Transient(String),
    /// The source cannot produce frames any more.
    #[error("fatal source failure: {0}")]
    Fatal(String),
}

impl SourceError {
    pub fn transient(err: impl std::fmt::Display) -> Self {
        SourceError::Transient(err.to_string())
    }

    pub fn fatal(err: impl std::fmt::Display) -> Self {
        SourceError::Fatal(err.to_string())
    }
}

/// Structural failures surfaced by the recorder.
///
/// Per-cycle failures (detector errors, single dropped writes) are absorbed
/// and counted instead of becoming one of these.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// The frame source stopped producing frames.
    #[error("camera could not be read: {0}")]
    SourceExhausted(#[source] SourceError),
    /// A new recording session could not be opened.
    #[error("could not open recording {session}: {reason}")]
    WriterOpen { session: String, reason: String },
    /// The detector backend could not be prepared.
    #[error("detector {backend} failed to warm up: {reason}")]
    DetectorInit { backend: String, reason: String },
    #[error("invalid configuration: {0}")]
    Config(String),
}
