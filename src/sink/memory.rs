use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{SessionWriter, VideoSink};
use crate::frame::{Frame, FrameSize};
use crate::recorder::SessionId;

/// What a `MemorySink` saw for one session.
#[derive(Clone, Debug)]
pub struct RecordedSession {
    pub id: SessionId,
    pub fps: f64,
    pub frame_size: FrameSize,
    pub frames: u64,
    pub close_calls: u32,
    pub closed: bool,
}

#[derive(Debug, Default)]
struct MemoryLog {
    sessions: Vec<RecordedSession>,
    failed_opens: u64,
    pending_open_failures: u32,
    fail_writes: bool,
    kill_writers: bool,
}

/// In-memory sink. Clones share the same log, so a test can keep one handle
/// while the recorder owns another.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    log: Arc<Mutex<MemoryLog>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `open` fail.
    pub fn fail_next_opens(&self, count: u32) {
        self.lock().pending_open_failures = count;
    }

    /// Make every write fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Make the next write on any open writer fail as if its encoder died:
    /// the writer reports itself closed afterwards.
    pub fn kill_writers(&self, kill: bool) {
        self.lock().kill_writers = kill;
    }

    pub fn sessions(&self) -> Vec<RecordedSession> {
        self.lock().sessions.clone()
    }

    pub fn failed_opens(&self) -> u64 {
        self.lock().failed_opens
    }

    fn lock(&self) -> MutexGuard<'_, MemoryLog> {
        // A panicking test thread must not hide the log from the others.
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl VideoSink for MemorySink {
    fn open(
        &mut self,
        session: &SessionId,
        fps: f64,
        frame_size: FrameSize,
    ) -> Result<Box<dyn SessionWriter>> {
        let mut log = self.lock();
        if log.pending_open_failures > 0 {
            log.pending_open_failures -= 1;
            log.failed_opens += 1;
            return Err(anyhow!("memory sink: injected open failure for {}", session));
        }
        log.sessions.push(RecordedSession {
            id: session.clone(),
            fps,
            frame_size,
            frames: 0,
            close_calls: 0,
            closed: false,
        });
        let index = log.sessions.len() - 1;
        Ok(Box::new(MemoryWriter {
            sink: self.clone(),
            index,
            open: true,
        }))
    }
}

struct MemoryWriter {
    sink: MemorySink,
    index: usize,
    open: bool,
}

impl SessionWriter for MemoryWriter {
    fn write(&mut self, _frame: &Frame) -> Result<()> {
        if !self.open {
            return Err(anyhow!("memory sink: write after close"));
        }
        let mut log = self.sink.lock();
        if log.kill_writers {
            log.sessions[self.index].closed = true;
            self.open = false;
            return Err(anyhow!("memory sink: writer killed"));
        }
        if log.fail_writes {
            return Err(anyhow!("memory sink: injected write failure"));
        }
        log.sessions[self.index].frames += 1;
        Ok(())
    }

    fn close(&mut self) {
        let mut log = self.sink.lock();
        let session = &mut log.sessions[self.index];
        session.close_calls += 1;
        if self.open {
            session.closed = true;
            self.open = false;
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        if self.open {
            self.close();
        }
    }
}
