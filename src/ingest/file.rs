//! Local video file source.
//!
//! Decodes a file through an `ffmpeg` subprocess emitting raw RGB24 frames at
//! the requested size on stdout. Only local paths are accepted.

use anyhow::{anyhow, Context, Result};
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

use super::FrameSource;
use crate::error::SourceError;
use crate::frame::Frame;

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path (e.g., "/var/lib/presence/porch.mp4").
    pub path: String,
    /// Decoded frame width; ffmpeg scales to it.
    pub width: u32,
    /// Decoded frame height.
    pub height: u32,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            width: 800,
            height: 600,
        }
    }
}

pub struct FileSource {
    config: FileConfig,
    process: Child,
    stdout: BufReader<ChildStdout>,
    frame_len: usize,
    frames_read: u64,
}

impl FileSource {
    pub fn open(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        if !Path::new(&config.path).is_file() {
            return Err(anyhow!("video file {} does not exist", config.path));
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("decode size must be non-zero"));
        }

        let mut process = Command::new("ffmpeg")
            .args(decoder_args(&config))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("start ffmpeg decoder for {}", config.path))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| anyhow!("ffmpeg decoder stdout unavailable"))?;

        let frame_len = (config.width as usize) * (config.height as usize) * 3;
        log::info!(
            "FileSource: decoding {} at {}x{}",
            config.path,
            config.width,
            config.height
        );
        Ok(Self {
            config,
            process,
            stdout: BufReader::with_capacity(frame_len * 2, stdout),
            frame_len,
            frames_read: 0,
        })
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }
}

impl FrameSource for FileSource {
    fn next_frame(&mut self) -> Result<Frame, SourceError> {
        let mut buf = vec![0u8; self.frame_len];
        match self.stdout.read_exact(&mut buf) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                log::info!(
                    "FileSource: {} ended after {} frames",
                    self.config.path,
                    self.frames_read
                );
                return Err(SourceError::EndOfStream);
            }
            Err(err) => return Err(SourceError::fatal(format!("read decoded frame: {}", err))),
        }
        self.frames_read += 1;
        Frame::rgb(buf, self.config.width, self.config.height).map_err(SourceError::fatal)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.config.path)
    }
}

impl Drop for FileSource {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

fn decoder_args(config: &FileConfig) -> Vec<String> {
    vec![
        "-v".to_string(),
        "error".to_string(),
        "-i".to_string(),
        config.path.clone(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgb24".to_string(),
        "-s".to_string(),
        format!("{}x{}", config.width, config.height),
        "-".to_string(),
    ]
}

fn is_local_file_path(path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    !path.contains("://")
}
