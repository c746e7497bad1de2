//! Full-path test: scripted camera frames through detection, recognition,
//! consensus, and the persistence worker, down to records and artifacts.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;

use bibwatch::config::DetectionSettings;
use bibwatch::detect::{BibBox, Detection, DetectorBackend};
use bibwatch::ingest::{CameraConfig, CameraSource, CaptureProvider, CaptureSession};
use bibwatch::recognize::{RecognitionCandidate, ScriptedRecognizer};
use bibwatch::store::{FilesystemBlobStore, InMemoryRunnerStore};
use bibwatch::upload::WorkerConfig;
use bibwatch::{
    normalize_bib, upload_channel, BibNumber, Frame, PersistenceWorker, Pipeline, ShutdownFlag,
};

/// Yields valid frames until `limit` reads, then drops the shutdown flag.
/// The first `probe` reads are consumed by acquisition and never reach the
/// pipeline.
struct CountdownSession {
    reads: u32,
    limit: u32,
    flag: ShutdownFlag,
}

impl CaptureSession for CountdownSession {
    fn read_frame(&mut self, _timeout: Duration) -> Result<Frame> {
        self.reads += 1;
        if self.reads >= self.limit {
            self.flag.stop();
        }
        Frame::new(vec![self.reads as u8; 640 * 480 * 3], 640, 480)
    }

    fn descriptor(&self) -> String {
        "test://countdown".to_string()
    }
}

struct CountdownProvider {
    limit: u32,
    flag: ShutdownFlag,
}

impl CaptureProvider for CountdownProvider {
    fn open(&mut self, _device: &str, _cfg: &CameraConfig) -> Result<Box<dyn CaptureSession>> {
        Ok(Box::new(CountdownSession {
            reads: 0,
            limit: self.limit,
            flag: self.flag.clone(),
        }))
    }
}

struct ScriptedDetector {
    script: std::collections::VecDeque<Vec<Detection>>,
}

impl DetectorBackend for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<Detection>> {
        Ok(self.script.pop_front().unwrap_or_default())
    }
}

fn detection() -> Detection {
    Detection {
        bbox: BibBox::new(120, 100, 360, 260).unwrap(),
        confidence: 0.9,
    }
}

fn candidate(text: &str) -> RecognitionCandidate {
    RecognitionCandidate {
        text: text.to_string(),
        confidence: 0.92,
    }
}

fn bib(text: &str) -> BibNumber {
    normalize_bib(text, 1.0, 0.0).unwrap()
}

fn fast_camera_config() -> CameraConfig {
    CameraConfig {
        read_timeout: Duration::from_millis(100),
        retry_backoff: Duration::from_millis(10),
        reconnect_cooldown: Duration::from_millis(10),
        ..CameraConfig::default()
    }
}

fn settings() -> DetectionSettings {
    DetectionSettings {
        detector: "scripted".to_string(),
        recognizer: "scripted".to_string(),
        min_confidence: 0.6,
        ocr_min_confidence: 0.7,
        min_tracking_frames: 2,
        max_tracking_entries: 100,
        process_every_n_frames: 1,
        max_detections_per_frame: 5,
    }
}

/// delivered = frames the pipeline sees; the acquisition probe burns the
/// first `probe_frames` reads of the session.
fn run_pipeline(
    delivered: u32,
    per_frame: Vec<(Vec<Detection>, Vec<RecognitionCandidate>)>,
    store: InMemoryRunnerStore,
) -> (Arc<Mutex<InMemoryRunnerStore>>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let flag = ShutdownFlag::new();
    let camera_cfg = fast_camera_config();
    let total_reads = camera_cfg.probe_frames + delivered;

    let camera = CameraSource::new(
        camera_cfg,
        Box::new(CountdownProvider {
            limit: total_reads,
            flag: flag.clone(),
        }),
    );

    let (detections, recognitions): (Vec<_>, Vec<_>) = per_frame.into_iter().unzip();
    let detector = ScriptedDetector {
        script: detections.into(),
    };
    let recognizer = ScriptedRecognizer::new(recognitions);

    let shared_store = Arc::new(Mutex::new(store));
    let blobs = FilesystemBlobStore::new(dir.path().join("archive")).expect("blob store");
    let worker_cfg = WorkerConfig {
        temp_dir: dir.path().join("tmp"),
        ..WorkerConfig::default()
    };

    let (queue, jobs) = upload_channel(50);
    let worker = PersistenceWorker::spawn(
        worker_cfg,
        shared_store.clone(),
        blobs,
        jobs,
        flag.clone(),
    )
    .expect("spawn worker");

    let mut pipeline = Pipeline::new(
        camera,
        Box::new(detector),
        Box::new(recognizer),
        Box::new(shared_store.clone()),
        queue,
        settings(),
    );

    pipeline.run(&flag).expect("pipeline run");
    assert!(worker
        .join_timeout(Duration::from_secs(5))
        .expect("join worker"));

    (shared_store, dir)
}

#[test]
fn confirmed_bib_is_persisted_exactly_once() {
    let per_frame = (0..4)
        .map(|_| (vec![detection()], vec![candidate("1234")]))
        .collect();

    let (store, _dir) = run_pipeline(4, per_frame, InMemoryRunnerStore::new());

    let store = store.lock().unwrap();
    let records = store.records_for(&bib("1234"));
    assert_eq!(records.len(), 1, "one confirmation, one record");

    let record = &records[0];
    assert_eq!(record.bib_number, "1234");
    assert_eq!(record.detection_confidence, 0.9);
    assert!(record.guntime_s.is_none());
    assert!(record.cp3_time_s > 0);
    assert!(record.recorded_at_s > 0);
    assert_eq!(record.image_sha256.len(), 64);

    // The artifact landed in the archive and is a JPEG.
    let archived = std::fs::read(&record.image_ref).expect("archived artifact");
    assert_eq!(&archived[..2], &[0xFF, 0xD8]);
}

#[test]
fn remote_seeded_bib_produces_no_record() {
    let mut store = InMemoryRunnerStore::new();
    store.seed(&bib("777"));

    let per_frame = (0..3)
        .map(|_| (vec![detection()], vec![candidate("777")]))
        .collect();

    let (store, _dir) = run_pipeline(3, per_frame, store);

    let store = store.lock().unwrap();
    assert!(store.records_for(&bib("777")).is_empty());
}

#[test]
fn distinct_bibs_are_each_recorded() {
    // Two runners crossing together: both regions read on every frame.
    let per_frame = (0..3)
        .map(|i| {
            (
                vec![
                    Detection {
                        bbox: BibBox::new(40, 100, 200, 240).unwrap(),
                        confidence: 0.85,
                    },
                    Detection {
                        bbox: BibBox::new(320, 100, 480, 240).unwrap(),
                        confidence: 0.8 + i as f32 * 0.01,
                    },
                ],
                // Recognition is scripted per region in detection order,
                // most confident region first.
                vec![candidate("88"), candidate("99")],
            )
        })
        .collect::<Vec<_>>();

    // Each frame triggers two recognize calls; split the candidate pairs
    // into one script entry per call.
    let mut detections = std::collections::VecDeque::new();
    let mut recognitions = Vec::new();
    for (dets, cands) in per_frame {
        detections.push_back(dets);
        for cand in cands {
            recognitions.push(vec![cand]);
        }
    }

    let dir = tempfile::tempdir().expect("temp dir");
    let flag = ShutdownFlag::new();
    let camera_cfg = fast_camera_config();
    let total_reads = camera_cfg.probe_frames + 3;
    let camera = CameraSource::new(
        camera_cfg,
        Box::new(CountdownProvider {
            limit: total_reads,
            flag: flag.clone(),
        }),
    );

    let shared_store = Arc::new(Mutex::new(InMemoryRunnerStore::new()));
    let blobs = FilesystemBlobStore::new(dir.path().join("archive")).expect("blob store");
    let worker_cfg = WorkerConfig {
        temp_dir: dir.path().join("tmp"),
        ..WorkerConfig::default()
    };
    let (queue, jobs) = upload_channel(50);
    let worker = PersistenceWorker::spawn(
        worker_cfg,
        shared_store.clone(),
        blobs,
        jobs,
        flag.clone(),
    )
    .expect("spawn worker");

    let mut pipeline = Pipeline::new(
        camera,
        Box::new(ScriptedDetector { script: detections }),
        Box::new(ScriptedRecognizer::new(recognitions)),
        Box::new(shared_store.clone()),
        queue,
        settings(),
    );
    pipeline.run(&flag).expect("pipeline run");
    assert!(worker
        .join_timeout(Duration::from_secs(5))
        .expect("join worker"));

    let store = shared_store.lock().unwrap();
    assert_eq!(store.records_for(&bib("88")).len(), 1);
    assert_eq!(store.records_for(&bib("99")).len(), 1);
    assert_eq!(store.total_records(), 2);
}
