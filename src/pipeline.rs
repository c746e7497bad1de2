//! Live processing loop: frames in, confirmed bib uploads out.
//!
//! Every sampled frame runs detect -> crop -> recognize -> normalize, then
//! takes one short critical section over the consensus tracker and the
//! dedup gate before handing confirmed sightings to the upload queue. The
//! queue never blocks this loop; when it is full the job is shed and only
//! logged, keeping capture latency flat under persistence backpressure.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::config::DetectionSettings;
use crate::dedup::{DedupGate, GateOutcome};
use crate::detect::DetectorBackend;
use crate::frame::Frame;
use crate::ingest::CameraSource;
use crate::normalize::{normalize_bib, BibNumber};
use crate::recognize::TextRecognizer;
use crate::shutdown::ShutdownFlag;
use crate::store::RunnerStore;
use crate::track::ConsensusTracker;
use crate::upload::{UploadJob, UploadQueue};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Tracker and gate live behind one lock so a frame's confirmation check
/// and its dedup decision are atomic with respect to operator commands.
struct SharedState {
    tracker: ConsensusTracker,
    gate: DedupGate,
}

/// Operator-facing handle onto the live consensus state.
#[derive(Clone)]
pub struct PipelineControl {
    state: Arc<Mutex<SharedState>>,
}

impl PipelineControl {
    /// Forget all confirmed bibs; previously seen runners may be recorded
    /// again. Mirrors a checkpoint reset between race waves.
    pub fn clear_confirmed(&self) -> Result<()> {
        let mut state = lock_state(&self.state)?;
        state.gate.clear();
        log::info!("operator command: confirmed set cleared");
        Ok(())
    }

    /// Drop all in-flight consensus counts without touching confirmations.
    pub fn clear_tracking(&self) -> Result<()> {
        let mut state = lock_state(&self.state)?;
        state.tracker.clear();
        log::info!("operator command: tracking state cleared");
        Ok(())
    }

    /// Confirmed bibs in ascending order.
    pub fn confirmed(&self) -> Result<Vec<BibNumber>> {
        let state = lock_state(&self.state)?;
        Ok(state.gate.sorted())
    }

    /// Number of bibs currently accumulating consensus.
    pub fn tracked(&self) -> Result<usize> {
        let state = lock_state(&self.state)?;
        Ok(state.tracker.len())
    }
}

fn lock_state(state: &Arc<Mutex<SharedState>>) -> Result<std::sync::MutexGuard<'_, SharedState>> {
    state
        .lock()
        .map_err(|_| anyhow!("pipeline state lock poisoned"))
}

/// Counters accumulated over one run.
#[derive(Debug, Default, Clone)]
pub struct PipelineStats {
    /// Frames pulled from the camera.
    pub frames_seen: u64,
    /// Frames that went through detection (after sampling).
    pub frames_processed: u64,
    /// Regions that produced a usable bib number.
    pub readings: u64,
    /// Bibs that passed consensus and the dedup gate.
    pub confirmations: u64,
    /// Confirmations already known to the remote record store.
    pub remote_skips: u64,
    /// Confirmed sightings dropped because the upload queue was full.
    pub shed: u64,
}

pub struct Pipeline {
    camera: CameraSource,
    detector: Box<dyn DetectorBackend>,
    recognizer: Box<dyn TextRecognizer>,
    store: Box<dyn RunnerStore>,
    queue: UploadQueue,
    settings: DetectionSettings,
    state: Arc<Mutex<SharedState>>,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(
        camera: CameraSource,
        detector: Box<dyn DetectorBackend>,
        recognizer: Box<dyn TextRecognizer>,
        store: Box<dyn RunnerStore>,
        queue: UploadQueue,
        settings: DetectionSettings,
    ) -> Self {
        let state = Arc::new(Mutex::new(SharedState {
            tracker: ConsensusTracker::new(
                settings.min_tracking_frames,
                settings.max_tracking_entries,
            ),
            gate: DedupGate::new(),
        }));
        Self {
            camera,
            detector,
            recognizer,
            store,
            queue,
            settings,
            state,
            stats: PipelineStats::default(),
        }
    }

    pub fn control(&self) -> PipelineControl {
        PipelineControl {
            state: self.state.clone(),
        }
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Pull frames until the flag drops or the camera fails terminally,
    /// then run the clean shutdown protocol (release the session, send the
    /// queue sentinel, log the run summary). The caller joins the worker.
    pub fn run(&mut self, flag: &ShutdownFlag) -> Result<()> {
        let started = Instant::now();
        let result = self.capture_loop(flag);
        self.camera.release();
        self.queue.send_sentinel();
        self.log_summary(started);
        result
    }

    fn capture_loop(&mut self, flag: &ShutdownFlag) -> Result<()> {
        self.detector.warm_up()?;
        let started = Instant::now();
        let mut last_health_log = Instant::now();
        while flag.is_running() {
            let Some(frame) = self.camera.next_frame(flag)? else {
                break;
            };
            self.process_frame(&frame)?;

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let elapsed = started.elapsed().as_secs_f64();
                let fps = if elapsed > 0.0 {
                    self.stats.frames_seen as f64 / elapsed
                } else {
                    0.0
                };
                log::info!(
                    "health: state={:?} fps={:.1} tracked={} confirmed={} queued={}",
                    self.camera.state(),
                    fps,
                    self.tracked_count()?,
                    self.stats.confirmations,
                    self.queue.depth(),
                );
                last_health_log = Instant::now();
            }
        }
        Ok(())
    }

    /// Run one frame through the full chain. Frames outside the sampling
    /// stride are counted and dropped.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<()> {
        self.stats.frames_seen += 1;
        if self.stats.frames_seen % self.settings.process_every_n_frames != 0 {
            return Ok(());
        }
        self.stats.frames_processed += 1;

        let readings = self.read_frame_bibs(frame)?;
        if readings.is_empty() && self.tracked_is_empty()? {
            return Ok(());
        }
        self.stats.readings += readings.len() as u64;

        let present: HashSet<BibNumber> = readings.keys().copied().collect();
        let mut confirmed = Vec::new();
        {
            let mut state = lock_state(&self.state)?;
            let eligible = state.tracker.observe_frame(&present);
            for bib in eligible {
                match state.gate.evaluate(&bib, self.store.as_mut()) {
                    GateOutcome::NewConfirmation => confirmed.push(bib),
                    GateOutcome::KnownRemote => {
                        self.stats.remote_skips += 1;
                        log::info!("bib {bib} already recorded remotely, skipping");
                    }
                    GateOutcome::AlreadyConfirmed => {}
                }
            }
        }

        for bib in confirmed {
            self.stats.confirmations += 1;
            let confidence = readings.get(&bib).copied().unwrap_or(0.0);
            log::info!("confirmed bib {bib} (detection confidence {confidence:.2})");
            let job = UploadJob {
                bib,
                image: frame.clone(),
                detection_confidence: confidence,
                captured_at_s: frame.captured_at_s,
            };
            if !self.queue.enqueue(job) {
                self.stats.shed += 1;
                log::warn!(
                    "upload queue full ({} waiting), dropping confirmed bib {bib}",
                    self.queue.depth()
                );
            }
        }
        Ok(())
    }

    /// Detect regions, read each one, and map every usable bib to the best
    /// detection confidence that produced it.
    fn read_frame_bibs(&mut self, frame: &Frame) -> Result<HashMap<BibNumber, f32>> {
        let mut detections = self
            .detector
            .detect(frame.pixels(), frame.width, frame.height)?;
        detections.retain(|d| d.confidence >= self.settings.min_confidence);
        detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        detections.truncate(self.settings.max_detections_per_frame);

        let mut readings: HashMap<BibNumber, f32> = HashMap::new();
        for detection in &detections {
            let Some(crop) = frame.crop_padded(&detection.bbox) else {
                continue;
            };
            let candidates =
                match self
                    .recognizer
                    .recognize(crop.pixels(), crop.width, crop.height)
                {
                    Ok(candidates) => candidates,
                    Err(err) => {
                        log::warn!("recognizer failed on region, skipping: {err:#}");
                        continue;
                    }
                };
            if let Some(bib) = best_candidate(&candidates, self.settings.ocr_min_confidence) {
                let entry = readings.entry(bib).or_insert(detection.confidence);
                if detection.confidence > *entry {
                    *entry = detection.confidence;
                }
            }
        }
        Ok(readings)
    }

    fn tracked_is_empty(&self) -> Result<bool> {
        let state = lock_state(&self.state)?;
        Ok(state.tracker.is_empty())
    }

    fn tracked_count(&self) -> Result<usize> {
        let state = lock_state(&self.state)?;
        Ok(state.tracker.len())
    }

    fn log_summary(&self, started: Instant) {
        let elapsed = started.elapsed();
        let fps = if elapsed.as_secs_f64() > 0.0 {
            self.stats.frames_seen as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let confirmed = match self.control().confirmed() {
            Ok(bibs) => bibs
                .iter()
                .map(|b| b.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            Err(_) => "<unavailable>".to_string(),
        };
        log::info!(
            "run summary: {} frames ({} processed, {:.1} fps), {} readings, \
             {} confirmations, {} remote skips, {} shed, camera reconnects {}",
            self.stats.frames_seen,
            self.stats.frames_processed,
            fps,
            self.stats.readings,
            self.stats.confirmations,
            self.stats.remote_skips,
            self.stats.shed,
            self.camera.reconnects(),
        );
        log::info!("confirmed bibs: [{confirmed}]");
    }
}

/// Pick the bib from the highest-confidence candidate that survives
/// normalization. Candidates below the OCR floor never qualify.
fn best_candidate(
    candidates: &[crate::recognize::RecognitionCandidate],
    min_confidence: f32,
) -> Option<BibNumber> {
    let mut ranked: Vec<_> = candidates.iter().collect();
    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    ranked
        .into_iter()
        .find_map(|c| normalize_bib(&c.text, c.confidence, min_confidence))
}
