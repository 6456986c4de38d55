//! Recording session identity and naming.
//!
//! Files are named `<prefix>_<unix_seconds>.<ext>`. When that name was already
//! used by this process (same second, or the clock stepped back) the first
//! free `_<n>` suffix is appended.

use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::sink::SessionWriter;

/// Unique name of one recording session.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId {
    file_name: String,
    unix_secs: u64,
}

impl SessionId {
    /// File name, without directory.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Wall-clock second the session was created in.
    pub fn unix_secs(&self) -> u64 {
        self.unix_secs
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.file_name)
    }
}

/// Derives session ids from wall-clock time.
///
/// Every name handed out by `commit` is remembered, so a wall clock that
/// steps backwards cannot produce a name this process already used.
#[derive(Clone, Debug)]
pub struct SessionNamer {
    prefix: String,
    extension: String,
    issued: HashSet<String>,
}

impl SessionNamer {
    pub fn new(prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
            issued: HashSet::new(),
        }
    }

    /// First unused name for `wall`. Nothing is reserved until `commit`.
    pub fn propose(&self, wall: SystemTime) -> Result<SessionId> {
        let unix_secs = wall
            .duration_since(UNIX_EPOCH)
            .map_err(|e| anyhow!("wall clock before unix epoch: {}", e))?
            .as_secs();

        let file_name = (0u32..)
            .map(|n| self.file_name(unix_secs, n))
            .find(|name| !self.issued.contains(name))
            .ok_or_else(|| anyhow!("no free session name for second {}", unix_secs))?;
        Ok(SessionId {
            file_name,
            unix_secs,
        })
    }

    /// Reserve a proposed name once its file was actually opened.
    pub fn commit(&mut self, id: &SessionId) {
        self.issued.insert(id.file_name.clone());
    }

    /// `propose` and `commit` in one step.
    pub fn next_id(&mut self, wall: SystemTime) -> Result<SessionId> {
        let id = self.propose(wall)?;
        self.commit(&id);
        Ok(id)
    }

    fn file_name(&self, unix_secs: u64, suffix: u32) -> String {
        if suffix == 0 {
            format!("{}_{}.{}", self.prefix, unix_secs, self.extension)
        } else {
            format!("{}_{}_{}.{}", self.prefix, unix_secs, suffix, self.extension)
        }
    }
}

/// An open recording: the writer plus bookkeeping.
pub struct RecordingSession {
    pub(crate) id: SessionId,
    pub(crate) writer: Box<dyn SessionWriter>,
    pub(crate) created_at: Instant,
    pub(crate) frames_written: u64,
    pub(crate) write_failures: u64,
}

impl RecordingSession {
    pub(crate) fn new(id: SessionId, writer: Box<dyn SessionWriter>, created_at: Instant) -> Self {
        Self {
            id,
            writer,
            created_at,
            frames_written: 0,
            write_failures: 0,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures
    }
}

impl std::fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingSession")
            .field("id", &self.id)
            .field("frames_written", &self.frames_written)
            .field("write_failures", &self.write_failures)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn names_follow_prefix_timestamp_extension() -> Result<()> {
        let mut namer = SessionNamer::new("motion", ".avi");
        let id = namer.next_id(at(1_700_000_123))?;
        assert_eq!(id.file_name(), "motion_1700000123.avi");
        assert_eq!(id.unix_secs(), 1_700_000_123);
        Ok(())
    }

    #[test]
    fn different_seconds_give_different_ids() -> Result<()> {
        let mut namer = SessionNamer::new("motion", "avi");
        let a = namer.next_id(at(10))?;
        let b = namer.next_id(at(11))?;
        assert_ne!(a, b);
        Ok(())
    }

    #[test]
    fn same_second_sessions_are_suffixed() -> Result<()> {
        let mut namer = SessionNamer::new("motion", "avi");
        let a = namer.next_id(at(10) + Duration::from_millis(100))?;
        let b = namer.next_id(at(10) + Duration::from_millis(900))?;
        let c = namer.next_id(at(12))?;
        assert_eq!(a.file_name(), "motion_10.avi");
        assert_eq!(b.file_name(), "motion_10_1.avi");
        assert_eq!(c.file_name(), "motion_12.avi");
        Ok(())
    }

    #[test]
    fn clock_stepping_back_never_reuses_a_name() -> Result<()> {
        let mut namer = SessionNamer::new("motion", "avi");
        let a = namer.next_id(at(10))?;
        let b = namer.next_id(at(9))?;
        let c = namer.next_id(at(10))?;
        assert_eq!(a.file_name(), "motion_10.avi");
        assert_eq!(b.file_name(), "motion_9.avi");
        assert_eq!(c.file_name(), "motion_10_1.avi");
        Ok(())
    }

    #[test]
    fn uncommitted_proposals_do_not_consume_names() -> Result<()> {
        let mut namer = SessionNamer::new("motion", "avi");
        let first = namer.propose(at(10))?;
        let retry = namer.propose(at(10))?;
        assert_eq!(first, retry);

        namer.commit(&retry);
        assert_eq!(namer.propose(at(10))?.file_name(), "motion_10_1.avi");
        Ok(())
    }
}
