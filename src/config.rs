use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::ingest::CameraConfig;
use crate::upload::WorkerConfig;

const DEFAULT_DEVICE: &str = "stub://start_line";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 15;
const DEFAULT_BUFFER_DEPTH: u32 = 1;
const DEFAULT_READ_TIMEOUT_S: u64 = 5;

const DEFAULT_DETECTOR: &str = "stub";
const DEFAULT_RECOGNIZER: &str = "stub";
const DEFAULT_DETECTION_CONFIDENCE: f32 = 0.6;
const DEFAULT_OCR_CONFIDENCE: f32 = 0.7;
const DEFAULT_MIN_TRACKING_FRAMES: u32 = 2;
const DEFAULT_MAX_TRACKING_ENTRIES: usize = 100;
const DEFAULT_PROCESS_EVERY_N_FRAMES: u64 = 5;
const DEFAULT_MAX_DETECTIONS_PER_FRAME: usize = 5;

const DEFAULT_QUEUE_CAPACITY: usize = 50;
const DEFAULT_SAVE_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 100;
const DEFAULT_DEQUEUE_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_JOIN_TIMEOUT_S: u64 = 5;

const DEFAULT_DB_PATH: &str = "bibwatch.db";
const DEFAULT_BLOB_DIR: &str = "bib_archive";

#[derive(Debug, Deserialize, Default)]
struct BibwatchConfigFile {
    camera: Option<CameraConfigFile>,
    detection: Option<DetectionConfigFile>,
    upload: Option<UploadConfigFile>,
    store: Option<StoreConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    devices: Option<Vec<String>>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    buffer_depth: Option<u32>,
    read_timeout_s: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    detector: Option<String>,
    recognizer: Option<String>,
    min_confidence: Option<f32>,
    ocr_min_confidence: Option<f32>,
    min_tracking_frames: Option<u32>,
    max_tracking_entries: Option<usize>,
    process_every_n_frames: Option<u64>,
    max_detections_per_frame: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadConfigFile {
    queue_capacity: Option<usize>,
    save_retries: Option<u32>,
    retry_delay_ms: Option<u64>,
    dequeue_timeout_ms: Option<u64>,
    worker_join_timeout_s: Option<u64>,
    temp_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct StoreConfigFile {
    db_path: Option<String>,
    blob_dir: Option<String>,
    remote_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BibwatchConfig {
    pub camera: CameraSettings,
    pub detection: DetectionSettings,
    pub upload: UploadSettings,
    pub store: StoreSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub devices: Vec<String>,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub buffer_depth: u32,
    pub read_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    /// Detector backend spec ("stub", "tract:<model.onnx>").
    pub detector: String,
    /// Recognizer spec ("stub").
    pub recognizer: String,
    pub min_confidence: f32,
    pub ocr_min_confidence: f32,
    pub min_tracking_frames: u32,
    pub max_tracking_entries: usize,
    pub process_every_n_frames: u64,
    pub max_detections_per_frame: usize,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub queue_capacity: usize,
    pub save_retries: u32,
    pub retry_delay: Duration,
    pub dequeue_timeout: Duration,
    pub worker_join_timeout: Duration,
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub db_path: String,
    pub blob_dir: String,
    /// When set, records and blobs go to the remote service instead of the
    /// local sqlite/filesystem pair (feature: remote-http).
    pub remote_url: Option<String>,
}

impl BibwatchConfig {
    /// Load from the file named by `BIBWATCH_CONFIG` (if set), apply
    /// `BIBWATCH_*` env overrides, then validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("BIBWATCH_CONFIG").ok();
        Self::load_path(config_path.as_deref().map(Path::new))
    }

    /// Like [`load`](Self::load), with an explicit config file path.
    pub fn load_path(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => BibwatchConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: BibwatchConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let upload = file.upload.unwrap_or_default();
        let store = file.store.unwrap_or_default();

        Self {
            camera: CameraSettings {
                devices: camera
                    .devices
                    .unwrap_or_else(|| vec![DEFAULT_DEVICE.to_string()]),
                width: camera.width.unwrap_or(DEFAULT_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_HEIGHT),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_FPS),
                buffer_depth: camera.buffer_depth.unwrap_or(DEFAULT_BUFFER_DEPTH),
                read_timeout: Duration::from_secs(
                    camera.read_timeout_s.unwrap_or(DEFAULT_READ_TIMEOUT_S),
                ),
            },
            detection: DetectionSettings {
                detector: detection
                    .detector
                    .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
                recognizer: detection
                    .recognizer
                    .unwrap_or_else(|| DEFAULT_RECOGNIZER.to_string()),
                min_confidence: detection
                    .min_confidence
                    .unwrap_or(DEFAULT_DETECTION_CONFIDENCE),
                ocr_min_confidence: detection
                    .ocr_min_confidence
                    .unwrap_or(DEFAULT_OCR_CONFIDENCE),
                min_tracking_frames: detection
                    .min_tracking_frames
                    .unwrap_or(DEFAULT_MIN_TRACKING_FRAMES),
                max_tracking_entries: detection
                    .max_tracking_entries
                    .unwrap_or(DEFAULT_MAX_TRACKING_ENTRIES),
                process_every_n_frames: detection
                    .process_every_n_frames
                    .unwrap_or(DEFAULT_PROCESS_EVERY_N_FRAMES),
                max_detections_per_frame: detection
                    .max_detections_per_frame
                    .unwrap_or(DEFAULT_MAX_DETECTIONS_PER_FRAME),
            },
            upload: UploadSettings {
                queue_capacity: upload.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
                save_retries: upload.save_retries.unwrap_or(DEFAULT_SAVE_RETRIES),
                retry_delay: Duration::from_millis(
                    upload.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS),
                ),
                dequeue_timeout: Duration::from_millis(
                    upload
                        .dequeue_timeout_ms
                        .unwrap_or(DEFAULT_DEQUEUE_TIMEOUT_MS),
                ),
                worker_join_timeout: Duration::from_secs(
                    upload
                        .worker_join_timeout_s
                        .unwrap_or(DEFAULT_JOIN_TIMEOUT_S),
                ),
                temp_dir: upload.temp_dir,
            },
            store: StoreSettings {
                db_path: store.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
                blob_dir: store
                    .blob_dir
                    .unwrap_or_else(|| DEFAULT_BLOB_DIR.to_string()),
                remote_url: store.remote_url,
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(devices) = std::env::var("BIBWATCH_DEVICES") {
            let parsed = split_csv(&devices);
            if !parsed.is_empty() {
                self.camera.devices = parsed;
            }
        }
        if let Ok(detector) = std::env::var("BIBWATCH_DETECTOR") {
            if !detector.trim().is_empty() {
                self.detection.detector = detector;
            }
        }
        if let Ok(recognizer) = std::env::var("BIBWATCH_RECOGNIZER") {
            if !recognizer.trim().is_empty() {
                self.detection.recognizer = recognizer;
            }
        }
        if let Ok(db_path) = std::env::var("BIBWATCH_DB_PATH") {
            if !db_path.trim().is_empty() {
                self.store.db_path = db_path;
            }
        }
        if let Ok(url) = std::env::var("BIBWATCH_REMOTE_URL") {
            if !url.trim().is_empty() {
                self.store.remote_url = Some(url);
            }
        }
        if let Ok(capacity) = std::env::var("BIBWATCH_QUEUE_CAPACITY") {
            let capacity: usize = capacity
                .parse()
                .map_err(|_| anyhow!("BIBWATCH_QUEUE_CAPACITY must be an integer"))?;
            self.upload.queue_capacity = capacity;
        }
        Ok(())
    }

    /// Reject configurations that cannot run. Called by the loaders; callers
    /// that mutate settings afterwards should call it again.
    pub fn validate(&self) -> Result<()> {
        if self.camera.devices.is_empty() {
            return Err(anyhow!("at least one camera device candidate is required"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera resolution must be non-zero"));
        }
        for (name, value) in [
            ("detection.min_confidence", self.detection.min_confidence),
            (
                "detection.ocr_min_confidence",
                self.detection.ocr_min_confidence,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1]", name));
            }
        }
        if self.detection.min_tracking_frames == 0 {
            return Err(anyhow!("detection.min_tracking_frames must be at least 1"));
        }
        if self.detection.max_tracking_entries == 0 {
            return Err(anyhow!("detection.max_tracking_entries must be at least 1"));
        }
        if self.detection.process_every_n_frames == 0 {
            return Err(anyhow!("detection.process_every_n_frames must be at least 1"));
        }
        if self.upload.queue_capacity == 0 {
            return Err(anyhow!("upload.queue_capacity must be at least 1"));
        }
        Ok(())
    }

    /// Camera acquisition parameters for the ingest layer.
    pub fn camera_config(&self) -> CameraConfig {
        CameraConfig {
            devices: self.camera.devices.clone(),
            width: self.camera.width,
            height: self.camera.height,
            target_fps: self.camera.target_fps,
            buffer_depth: self.camera.buffer_depth,
            read_timeout: self.camera.read_timeout,
            ..CameraConfig::default()
        }
    }

    /// Persistence worker parameters.
    pub fn worker_config(&self) -> WorkerConfig {
        let mut cfg = WorkerConfig {
            save_retries: self.upload.save_retries,
            retry_delay: self.upload.retry_delay,
            dequeue_timeout: self.upload.dequeue_timeout,
            ..WorkerConfig::default()
        };
        if let Some(temp_dir) = &self.upload.temp_dir {
            cfg.temp_dir = temp_dir.clone();
        }
        cfg
    }
}

fn read_config_file(path: &Path) -> Result<BibwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
