use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use presence_recorder::config::PresencedConfig;
use presence_recorder::FrameSize;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PRESENCE_CONFIG",
        "PRESENCE_SOURCE",
        "PRESENCE_OUTPUT_DIR",
        "PRESENCE_OUTPUT_PREFIX",
        "PRESENCE_DETECTION_INTERVAL",
        "PRESENCE_HYSTERESIS_SECS",
        "PRESENCE_DETECTOR_BACKEND",
        "PRESENCE_DETECTOR_MODEL",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(suffix: &str, body: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    file.write_all(body.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_match_the_porch_camera_setup() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = PresencedConfig::load().expect("load defaults");
    let rec = cfg.controller_config();

    assert_eq!(cfg.source_uri, "stub://camera");
    assert_eq!(cfg.detector_backend, "cpu");
    assert_eq!(rec.sampler.interval_frames, 5);
    assert_eq!(rec.sampler.downscale_factor, 0.5);
    assert_eq!(rec.sampler.params.min_neighbors, 7);
    assert_eq!(rec.sampler.params.min_box_size, 30);
    assert_eq!(rec.hysteresis_window, Duration::from_secs(5));
    assert_eq!(rec.output_fps, 15.0);
    assert_eq!(rec.output_frame_size, FrameSize::new(800, 600));
    assert_eq!(rec.output_prefix, "motion");
    assert_eq!(rec.output_extension, "avi");
    assert_eq!(rec.source_retry_limit, 0);

    let settings = cfg.source_settings();
    assert_eq!((settings.width, settings.height, settings.target_fps), (800, 600, 15));
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{
            "source": { "uri": "/var/lib/presence/porch.mp4", "retry_limit": 3 },
            "detection": { "backend": "stub", "interval_frames": 3, "min_neighbors": 2 },
            "recording": { "hysteresis_window_secs": 8.5, "overlay": false },
            "output": { "dir": "/srv/recordings", "extension": ".mp4", "width": 640, "height": 480 }
        }"#,
    );

    std::env::set_var("PRESENCE_CONFIG", file.path());
    std::env::set_var("PRESENCE_OUTPUT_PREFIX", "porch");
    std::env::set_var("PRESENCE_DETECTION_INTERVAL", "10");

    let cfg = PresencedConfig::load().expect("load config");
    let rec = cfg.controller_config();

    assert_eq!(cfg.source_uri, "/var/lib/presence/porch.mp4");
    assert_eq!(cfg.detector_backend, "stub");
    assert_eq!(cfg.output_dir.to_str(), Some("/srv/recordings"));
    assert_eq!(rec.source_retry_limit, 3);
    assert_eq!(rec.sampler.interval_frames, 10);
    assert_eq!(rec.sampler.params.min_neighbors, 2);
    assert_eq!(rec.hysteresis_window, Duration::from_millis(8_500));
    assert!(!rec.draw_overlay);
    assert_eq!(rec.output_prefix, "porch");
    assert_eq!(rec.output_extension, "mp4");
    assert_eq!(rec.output_frame_size, FrameSize::new(640, 480));

    clear_env();
}

#[test]
fn loads_toml_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        r#"
            [source]
            uri = "stub://garage?presence=10-40"

            [recording]
            hysteresis_window_secs = 2.0
        "#,
    );
    std::env::set_var("PRESENCE_HYSTERESIS_SECS", "3");

    let cfg = PresencedConfig::load_from(Some(file.path())).expect("load toml");
    assert_eq!(cfg.source_uri, "stub://garage?presence=10-40");
    assert_eq!(cfg.recorder.hysteresis_window, Duration::from_secs(3));

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PRESENCE_DETECTION_INTERVAL", "0");
    assert!(PresencedConfig::load().is_err());
    clear_env();

    std::env::set_var("PRESENCE_HYSTERESIS_SECS", "-1");
    assert!(PresencedConfig::load().is_err());
    clear_env();

    std::env::set_var("PRESENCE_DETECTOR_BACKEND", "haar");
    let err = PresencedConfig::load().unwrap_err().to_string();
    assert!(err.contains("unknown detector backend"));
    clear_env();

    let file = config_file(".json", r#"{ "detection": { "downscale_factor": 2.0 } }"#);
    std::env::set_var("PRESENCE_CONFIG", file.path());
    assert!(PresencedConfig::load().is_err());
    clear_env();
}

#[test]
fn tract_backend_needs_a_model_path() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        "[detection]\nbackend = \"tract\"\nconfidence_threshold = 0.6\n",
    );
    let result = PresencedConfig::load_from(Some(file.path()));
    if cfg!(feature = "backend-tract") {
        let err = result.expect_err("missing model path");
        assert!(err.to_string().contains("model_path"));

        std::env::set_var("PRESENCE_DETECTOR_MODEL", "/models/face.onnx");
        let cfg = PresencedConfig::load_from(Some(file.path())).expect("model from env");
        assert_eq!(
            cfg.detector_options.model_path.as_deref(),
            Some(std::path::Path::new("/models/face.onnx"))
        );
        assert_eq!(cfg.detector_options.confidence_threshold, 0.6);
        assert_eq!(
            (cfg.detector_options.input_width, cfg.detector_options.input_height),
            (320, 240)
        );
    } else {
        let err = result.expect_err("tract not compiled in");
        assert!(err.to_string().contains("unknown detector backend"));
    }
    clear_env();
}

#[test]
fn confidence_threshold_must_be_a_probability() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(".json", r#"{"detection": {"confidence_threshold": 1.5}}"#);
    let err = PresencedConfig::load_from(Some(file.path())).expect_err("threshold above 1");
    assert!(err.to_string().contains("confidence threshold"));
}
