//! `ffmpeg` subprocess encoder.
//!
//! Raw RGB24 frames are piped to ffmpeg's stdin. Closing drops stdin and waits
//! for the process, which writes the container trailer. An encoder that exits
//! on its own (missing codec, unwritable output) is reported as an open
//! failure, or as a dead writer once frames were already flowing.

use anyhow::{anyhow, Context, Result};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{SessionWriter, VideoSink};
use crate::frame::{Frame, FrameSize};
use crate::recorder::SessionId;

const DEFAULT_FFMPEG: &str = "ffmpeg";

/// How long `open` watches a fresh encoder for an early exit.
const STARTUP_GRACE: Duration = Duration::from_millis(150);
const STARTUP_POLL: Duration = Duration::from_millis(10);

/// Lines of encoder stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 8;

/// Sink that writes each session to `<output_dir>/<session file name>`.
#[derive(Clone, Debug)]
pub struct FfmpegSink {
    output_dir: PathBuf,
    program: String,
}

impl FfmpegSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            program: DEFAULT_FFMPEG.to_string(),
        }
    }

    /// Use a specific ffmpeg binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl VideoSink for FfmpegSink {
    fn open(
        &mut self,
        session: &SessionId,
        fps: f64,
        frame_size: FrameSize,
    ) -> Result<Box<dyn SessionWriter>> {
        std::fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("create output directory {}", self.output_dir.display())
        })?;
        let path = self.output_dir.join(session.file_name());
        if path.exists() {
            return Err(anyhow!("{} already exists", path.display()));
        }
        let args = encoder_args(&path, fps, frame_size);

        log::debug!("starting ffmpeg encoder: {} {:?}", self.program, args);
        let mut process = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("start {} for {}", self.program, path.display()))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg stdin"))?;
        let stderr = process
            .stderr
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg stderr"))?;

        let mut writer = FfmpegWriter {
            process: Some(process),
            stdin: Some(stdin),
            stderr: StderrTail::spawn(stderr),
            path,
            frame_size,
            frames: 0,
        };
        if let Some(status) = writer.exited_within(STARTUP_GRACE)? {
            return Err(writer.encoder_exit_error(status));
        }
        Ok(Box::new(writer))
    }
}

/// Codec selection follows the file extension: MJPEG in `.avi`, H.264 for
/// everything else. `-n` makes ffmpeg refuse to overwrite an existing file.
fn encoder_args(path: &Path, fps: f64, frame_size: FrameSize) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-n",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgb24",
        "-s",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(frame_size.to_string());
    args.push("-r".to_string());
    args.push(fps.to_string());
    args.push("-i".to_string());
    args.push("-".to_string());

    let is_avi = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("avi"));
    let codec: &[&str] = if is_avi {
        &["-c:v", "mjpeg", "-q:v", "3"]
    } else {
        &["-c:v", "libx264", "-preset", "veryfast", "-pix_fmt", "yuv420p"]
    };
    args.extend(codec.iter().map(|s| s.to_string()));
    args.push(path.display().to_string());
    args
}

/// Background reader keeping the last few stderr lines of the encoder, so
/// the pipe never fills up and failures can say why.
struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    reader: Option<JoinHandle<()>>,
}

impl StderrTail {
    fn spawn(stderr: ChildStderr) -> Self {
        let lines = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let sink = Arc::clone(&lines);
        let reader = std::thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(|line| line.ok()) {
                let mut tail = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        });
        Self {
            lines,
            reader: Some(reader),
        }
    }

    /// Wait for the reader to hit EOF (the process has exited) and return
    /// what it collected.
    fn finish(&mut self) -> String {
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        let tail = self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let joined = tail.iter().cloned().collect::<Vec<_>>().join("; ");
        joined
    }
}

/// Writer backed by one ffmpeg process.
pub struct FfmpegWriter {
    process: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr: StderrTail,
    path: PathBuf,
    frame_size: FrameSize,
    frames: u64,
}

impl FfmpegWriter {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn exited_within(&mut self, grace: Duration) -> Result<Option<ExitStatus>> {
        let Some(process) = self.process.as_mut() else {
            return Ok(None);
        };
        let deadline = Instant::now() + grace;
        loop {
            if let Some(status) = process.try_wait().context("poll ffmpeg encoder")? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(STARTUP_POLL);
        }
    }

    fn encoder_exit_error(&mut self, status: ExitStatus) -> anyhow::Error {
        drop(self.stdin.take());
        self.process = None;
        let tail = self.stderr.finish();
        if tail.is_empty() {
            anyhow!("encoder for {} exited with {}", self.path.display(), status)
        } else {
            anyhow!(
                "encoder for {} exited with {}: {}",
                self.path.display(),
                status,
                tail
            )
        }
    }

    /// The encoder stopped reading: reap it and mark the writer closed.
    fn reap_dead_encoder(&mut self, err: std::io::Error) -> anyhow::Error {
        drop(self.stdin.take());
        let status = self.process.take().map(|mut process| process.wait());
        match status {
            Some(Ok(status)) => self.encoder_exit_error(status),
            _ => anyhow!("encoder for {} stopped reading: {}", self.path.display(), err),
        }
    }
}

impl SessionWriter for FfmpegWriter {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("writer for {} is closed", self.path.display()))?;
        let bytes = frame.rgb24_bytes(self.frame_size)?;
        match stdin.write_all(&bytes) {
            Ok(()) => {
                self.frames += 1;
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::BrokenPipe => Err(self.reap_dead_encoder(err)),
            Err(err) => Err(anyhow::Error::new(err)
                .context(format!("write frame to {}", self.path.display()))),
        }
    }

    fn close(&mut self) {
        // Dropping stdin signals EOF to ffmpeg.
        drop(self.stdin.take());
        let Some(mut process) = self.process.take() else {
            return;
        };
        let status = process.wait();
        let tail = self.stderr.finish();
        match status {
            Ok(status) if status.success() => {
                log::debug!("ffmpeg finalized {} ({} frames)", self.path.display(), self.frames);
            }
            Ok(status) => {
                log::warn!(
                    "ffmpeg exited with {} for {}: {}",
                    status,
                    self.path.display(),
                    tail
                );
            }
            Err(err) => {
                log::warn!("failed to wait for ffmpeg ({}): {}", self.path.display(), err);
            }
        }
    }

    fn is_open(&self) -> bool {
        self.stdin.is_some()
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        self.close();
    }
}
