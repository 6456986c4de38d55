//! presenced - presence-triggered recorder daemon
//!
//! This daemon:
//! 1. Pulls frames from the configured source (stub://, file, /dev/videoN)
//! 2. Runs the detector on every Nth frame
//! 3. Records to `<output_dir>/<prefix>_<unix_ts>.<ext>` while presence lasts
//! 4. Closes the open recording on Ctrl-C or end of stream

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use presence_recorder::{
    backend_by_name, open_source, Controller, FfmpegSink, PresencedConfig, RecorderState,
    SessionId, SystemClock,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Record a camera feed while someone is in view")]
struct Args {
    /// JSON or TOML config file.
    #[arg(long, env = "PRESENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Frame source: stub://name[?presence=a-b&frames=n], /dev/videoN or a video file.
    #[arg(long)]
    source: Option<String>,

    /// Directory recordings are written to.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Detector backend (cpu, stub, tract).
    #[arg(long)]
    detector: Option<String>,

    /// ONNX model for the tract backend.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = PresencedConfig::load_from(args.config.as_deref())?;
    if let Some(source) = args.source {
        cfg.source_uri = source;
    }
    if let Some(dir) = args.output_dir {
        cfg.output_dir = dir;
    }
    if let Some(detector) = args.detector {
        cfg.detector_backend = detector;
    }
    if let Some(model) = args.model {
        cfg.detector_options.model_path = Some(model);
    }

    let source = open_source(&cfg.source_uri, cfg.source_settings())
        .with_context(|| format!("open source {}", cfg.source_uri))?;
    let backend = backend_by_name(&cfg.detector_backend, &cfg.detector_options)
        .with_context(|| format!("detector backend {}", cfg.detector_backend))?;
    let sink = FfmpegSink::new(&cfg.output_dir);

    let mut controller = Controller::new(
        cfg.controller_config(),
        source,
        backend,
        Box::new(sink),
        Box::new(SystemClock),
    )?;
    controller.add_observer(
        |old: RecorderState, new: RecorderState, session: Option<&SessionId>| {
            let name = session.map(SessionId::file_name).unwrap_or("-");
            log::info!("state {} -> {} ({})", old, new, name);
        },
    );

    let shutdown = controller.shutdown_handle();
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!(
        "presenced running. writing {}_<ts>.{} to {}",
        cfg.recorder.output_prefix,
        cfg.recorder.output_extension,
        cfg.output_dir.display()
    );

    let summary = controller.run(args.max_frames)?;
    log::info!(
        "presenced exiting: {} frames, {} recordings, {} detector runs ({} failed)",
        summary.frames,
        summary.stats.sessions_closed,
        summary.detector_runs,
        summary.detector_failures
    );
    Ok(())
}
