use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use bibwatch::config::BibwatchConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "BIBWATCH_CONFIG",
        "BIBWATCH_DEVICES",
        "BIBWATCH_DETECTOR",
        "BIBWATCH_RECOGNIZER",
        "BIBWATCH_DB_PATH",
        "BIBWATCH_REMOTE_URL",
        "BIBWATCH_QUEUE_CAPACITY",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "camera": {
            "devices": ["/dev/video0", "/dev/video1"],
            "width": 1280,
            "height": 720,
            "target_fps": 30,
            "read_timeout_s": 3
        },
        "detection": {
            "detector": "tract:bib.onnx",
            "min_confidence": 0.5,
            "ocr_min_confidence": 0.8,
            "min_tracking_frames": 3,
            "process_every_n_frames": 2
        },
        "upload": {
            "queue_capacity": 20,
            "dequeue_timeout_ms": 500
        },
        "store": {
            "db_path": "race_prod.db",
            "blob_dir": "race_archive"
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("BIBWATCH_CONFIG", file.path());
    std::env::set_var("BIBWATCH_DEVICES", "stub://finish_line");
    std::env::set_var("BIBWATCH_QUEUE_CAPACITY", "35");

    let cfg = BibwatchConfig::load().expect("load config");

    assert_eq!(cfg.camera.devices, vec!["stub://finish_line"]);
    assert_eq!(cfg.camera.width, 1280);
    assert_eq!(cfg.camera.height, 720);
    assert_eq!(cfg.camera.target_fps, 30);
    assert_eq!(cfg.camera.read_timeout, Duration::from_secs(3));
    assert_eq!(cfg.detection.detector, "tract:bib.onnx");
    assert_eq!(cfg.detection.recognizer, "stub");
    assert_eq!(cfg.detection.min_confidence, 0.5);
    assert_eq!(cfg.detection.ocr_min_confidence, 0.8);
    assert_eq!(cfg.detection.min_tracking_frames, 3);
    assert_eq!(cfg.detection.process_every_n_frames, 2);
    assert_eq!(cfg.upload.queue_capacity, 35);
    assert_eq!(cfg.upload.dequeue_timeout, Duration::from_millis(500));
    assert_eq!(cfg.store.db_path, "race_prod.db");
    assert_eq!(cfg.store.blob_dir, "race_archive");
    assert!(cfg.store.remote_url.is_none());

    clear_env();
}

#[test]
fn defaults_apply_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = BibwatchConfig::load().expect("load config");

    assert_eq!(cfg.camera.devices, vec!["stub://start_line"]);
    assert_eq!(cfg.camera.width, 640);
    assert_eq!(cfg.camera.height, 480);
    assert_eq!(cfg.detection.detector, "stub");
    assert_eq!(cfg.detection.min_confidence, 0.6);
    assert_eq!(cfg.detection.ocr_min_confidence, 0.7);
    assert_eq!(cfg.detection.min_tracking_frames, 2);
    assert_eq!(cfg.detection.max_tracking_entries, 100);
    assert_eq!(cfg.detection.process_every_n_frames, 5);
    assert_eq!(cfg.detection.max_detections_per_frame, 5);
    assert_eq!(cfg.upload.queue_capacity, 50);
    assert_eq!(cfg.upload.save_retries, 3);
    assert_eq!(cfg.upload.dequeue_timeout, Duration::from_secs(2));
    assert_eq!(cfg.upload.worker_join_timeout, Duration::from_secs(5));
    assert_eq!(cfg.store.db_path, "bibwatch.db");

    clear_env();
}

#[test]
fn rejects_invalid_thresholds() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{ "detection": { "min_confidence": 1.5 } }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    std::env::set_var("BIBWATCH_CONFIG", file.path());

    let err = BibwatchConfig::load().expect_err("out-of-range threshold");
    assert!(err.to_string().contains("min_confidence"));

    clear_env();
}

#[test]
fn rejects_zero_sampling_stride() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{ "detection": { "process_every_n_frames": 0 } }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    std::env::set_var("BIBWATCH_CONFIG", file.path());

    assert!(BibwatchConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_malformed_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"{ not json ").expect("write config");
    std::env::set_var("BIBWATCH_CONFIG", file.path());

    let err = BibwatchConfig::load().expect_err("malformed file");
    assert!(err.to_string().contains("invalid config file"));

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BIBWATCH_CONFIG", "/nonexistent/bibwatch.json");

    let err = BibwatchConfig::load().expect_err("missing file");
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
