//! Layered configuration loading

use std::io::Write;
use std::time::Duration;

use edgecam::capture::PixelFormat;
use edgecam::{CaptureBackend, Config, ConfigError};

fn toml_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn file_overrides_only_what_it_names() {
    let file = toml_file(
        r#"
[capture]
backend = "synthetic"
width = 320
height = 240
format = "I420"

[pipeline]
min_interval_ms = 100
start_enabled = true
"#,
    );

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.capture.backend, CaptureBackend::Synthetic);
    assert_eq!(config.capture.resolution().to_string(), "320x240");
    assert_eq!(config.capture.format, PixelFormat::I420);
    assert_eq!(config.pipeline.min_interval(), Duration::from_millis(100));
    assert!(config.pipeline.start_enabled);

    let defaults = Config::default();
    assert_eq!(config.pipeline.queue_depth, defaults.pipeline.queue_depth);
    assert_eq!(config.transform, defaults.transform);
    assert_eq!(config.display.snapshot_path, None);
}

#[test]
fn snapshot_path_is_read_from_file() {
    let file = toml_file(
        r#"
[display]
snapshot_path = "/tmp/edgecam-last.png"
"#,
    );

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(
        config.display.snapshot_path.as_deref(),
        Some(std::path::Path::new("/tmp/edgecam-last.png"))
    );
}

#[test]
fn empty_resolution_is_rejected() {
    let file = toml_file(
        r#"
[capture]
width = 0
"#,
    );

    assert!(matches!(
        Config::load(Some(file.path())),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn missing_file_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.toml");

    assert!(matches!(
        Config::load(Some(&missing)),
        Err(ConfigError::Load(_))
    ));
}
