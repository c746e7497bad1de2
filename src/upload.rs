//! Bounded upload queue and persistence worker.
//!
//! The queue is the only channel between the latency-critical frame loop
//! and the slow persistence path. Enqueue never blocks: when the queue is
//! full the job is shed and reported. A single background worker drains the
//! queue, writes the artifact locally with bounded retries, transmits it,
//! records metadata, and unconditionally cleans up the local temp file.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};

use crate::frame::{artifact_checksum, Frame};
use crate::normalize::BibNumber;
use crate::retry::retry_with_backoff;
use crate::shutdown::ShutdownFlag;
use crate::store::{BlobStore, RunnerRecord, RunnerStore};

/// One unit of work handed from live processing to the worker.
#[derive(Debug)]
pub struct UploadJob {
    pub bib: BibNumber,
    /// Full frame at confirmation time. The archive keeps the whole frame,
    /// not just the bib crop, so the runner stays identifiable.
    pub image: Frame,
    pub detection_confidence: f32,
    pub captured_at_s: u64,
}

enum QueueMessage {
    Job(Box<UploadJob>),
    /// Sentinel: no more work; terminate.
    Shutdown,
}

/// Producer half of the bounded job queue.
#[derive(Clone)]
pub struct UploadQueue {
    tx: SyncSender<QueueMessage>,
    depth: Arc<AtomicUsize>,
}

/// Consumer half, owned by the persistence worker.
pub struct JobReceiver {
    rx: Receiver<QueueMessage>,
    depth: Arc<AtomicUsize>,
}

/// Create a bounded FIFO job channel of the given capacity.
pub fn upload_channel(capacity: usize) -> (UploadQueue, JobReceiver) {
    let (tx, rx) = mpsc::sync_channel(capacity.max(1));
    let depth = Arc::new(AtomicUsize::new(0));
    (
        UploadQueue {
            tx,
            depth: depth.clone(),
        },
        JobReceiver { rx, depth },
    )
}

impl UploadQueue {
    /// Non-blocking enqueue. Returns false when the job was shed (queue
    /// full or worker gone); the caller only logs, never waits.
    pub fn enqueue(&self, job: UploadJob) -> bool {
        match self.tx.try_send(QueueMessage::Job(Box::new(job))) {
            Ok(()) => {
                self.depth.fetch_add(1, Ordering::SeqCst);
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Non-blocking sentinel send; failure (queue full or already closed)
    /// is ignored, the worker's flag check covers that case.
    pub fn send_sentinel(&self) {
        let _ = self.tx.try_send(QueueMessage::Shutdown);
    }

    /// Jobs currently waiting for the worker.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

/// Tuning for the persistence worker.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Scoped writable area for temporary artifacts.
    pub temp_dir: PathBuf,
    /// Attempts for the local artifact write.
    pub save_retries: u32,
    /// Delay between retry attempts (local writes and remote calls).
    pub retry_delay: Duration,
    /// Bounded dequeue wait; the running flag is re-checked at this cadence.
    pub dequeue_timeout: Duration,
    /// Remote key prefix for uploaded artifacts.
    pub blob_key_prefix: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join("bibwatch"),
            save_retries: 3,
            retry_delay: Duration::from_millis(100),
            dequeue_timeout: Duration::from_secs(2),
            blob_key_prefix: "bibs".to_string(),
        }
    }
}

/// Handle to the background worker thread.
pub struct WorkerHandle {
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Wait for the worker up to `timeout`.
    ///
    /// Returns true when the worker finished and was joined; false when it
    /// overran the timeout and was abandoned. An abandoned worker is never
    /// killed mid-write; it just stops receiving anything.
    pub fn join_timeout(mut self, timeout: Duration) -> Result<bool> {
        let Some(join) = self.join.take() else {
            return Ok(true);
        };
        let deadline = Instant::now() + timeout;
        while !join.is_finished() {
            if Instant::now() >= deadline {
                log::warn!("persistence worker overran join timeout, abandoning");
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        join.join()
            .map_err(|_| anyhow!("persistence worker panicked"))?;
        Ok(true)
    }
}

/// Single background worker that drains the upload queue.
pub struct PersistenceWorker;

impl PersistenceWorker {
    /// Prepare the temp area and start the worker thread.
    pub fn spawn<S, B>(
        cfg: WorkerConfig,
        mut store: S,
        mut blobs: B,
        jobs: JobReceiver,
        flag: ShutdownFlag,
    ) -> Result<WorkerHandle>
    where
        S: RunnerStore + 'static,
        B: BlobStore + 'static,
    {
        prepare_temp_dir(&cfg.temp_dir)?;

        let join = std::thread::spawn(move || {
            let mut persisted = 0u64;
            let mut abandoned = 0u64;
            loop {
                let message = match jobs.rx.recv_timeout(cfg.dequeue_timeout) {
                    Ok(message) => message,
                    Err(RecvTimeoutError::Timeout) => {
                        if !flag.is_running() {
                            break;
                        }
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                };
                match message {
                    QueueMessage::Shutdown => break,
                    QueueMessage::Job(job) => {
                        jobs.depth.fetch_sub(1, Ordering::SeqCst);
                        // A single bad job must never terminate the worker.
                        match process_job(&cfg, &mut store, &mut blobs, &job) {
                            Ok(()) => persisted += 1,
                            Err(err) => {
                                abandoned += 1;
                                log::warn!("upload abandoned for bib {}: {}", job.bib, err);
                            }
                        }
                    }
                }
            }
            log::info!(
                "persistence worker stopped ({} persisted, {} abandoned)",
                persisted,
                abandoned
            );
        });

        Ok(WorkerHandle { join: Some(join) })
    }
}

/// Create the scoped temp area and verify it is writable.
fn prepare_temp_dir(dir: &PathBuf) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create temp directory {}", dir.display()))?;
    let probe = dir.join(".write_probe");
    std::fs::write(&probe, b"probe")
        .with_context(|| format!("temp directory {} is not writable", dir.display()))?;
    let _ = std::fs::remove_file(&probe);
    Ok(())
}

fn artifact_filename(job: &UploadJob) -> String {
    let suffix: [u8; 4] = rand::random();
    format!(
        "bib_{}_{}_{}.jpg",
        job.bib,
        job.captured_at_s,
        hex::encode(suffix)
    )
}

/// Persist one job: local write with retry, transmit, record, cleanup.
///
/// Local write happens-before transmission, transmission happens-before
/// cleanup, and cleanup runs regardless of transmit outcome.
fn process_job<S: RunnerStore, B: BlobStore>(
    cfg: &WorkerConfig,
    store: &mut S,
    blobs: &mut B,
    job: &UploadJob,
) -> Result<()> {
    let jpeg = job.image.encode_jpeg()?;
    let filename = artifact_filename(job);
    let local_path = cfg.temp_dir.join(&filename);

    let saved = retry_with_backoff(cfg.save_retries, cfg.retry_delay, |attempt| {
        std::fs::write(&local_path, &jpeg)
            .with_context(|| format!("write artifact (attempt {})", attempt))?;
        let len = std::fs::metadata(&local_path)
            .with_context(|| format!("stat artifact (attempt {})", attempt))?
            .len();
        if len == 0 {
            bail!("artifact is empty on disk (attempt {})", attempt);
        }
        Ok(())
    });

    let result = saved.and_then(|()| {
        log::debug!("artifact saved locally: {} ({} bytes)", filename, jpeg.len());
        let key = format!("{}/{}", cfg.blob_key_prefix, filename);
        let image_ref = retry_with_backoff(cfg.save_retries, cfg.retry_delay, |_| {
            blobs.upload(&local_path, &key)
        })?;
        let record = RunnerRecord {
            bib_number: job.bib.to_string(),
            cp3_time_s: job.captured_at_s,
            guntime_s: None,
            image_ref,
            detection_confidence: job.detection_confidence,
            image_sha256: artifact_checksum(&jpeg),
            recorded_at_s: 0,
        };
        retry_with_backoff(cfg.save_retries, cfg.retry_delay, |_| store.insert(&record))?;
        log::info!(
            "uploaded bib {} (confidence {:.2})",
            job.bib,
            job.detection_confidence
        );
        Ok(())
    });

    // Scoped-resource release: the temp artifact goes away no matter how
    // the transmit went.
    match std::fs::remove_file(&local_path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => log::warn!("failed to clean up temp artifact {}: {}", filename, err),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_bib;
    use crate::store::{FilesystemBlobStore, InMemoryRunnerStore};
    use std::path::Path;
    use std::sync::Mutex;

    fn bib(text: &str) -> BibNumber {
        normalize_bib(text, 1.0, 0.0).unwrap()
    }

    fn job(bib_text: &str) -> UploadJob {
        let frame = Frame::new(vec![90u8; 64 * 48 * 3], 64, 48).unwrap();
        UploadJob {
            bib: bib(bib_text),
            captured_at_s: frame.captured_at_s,
            image: frame,
            detection_confidence: 0.8,
        }
    }

    struct FailingBlobStore;

    impl BlobStore for FailingBlobStore {
        fn upload(&mut self, _local_path: &Path, _key: &str) -> Result<String> {
            Err(anyhow!("network unreachable"))
        }
    }

    fn worker_config(dir: &Path) -> WorkerConfig {
        WorkerConfig {
            temp_dir: dir.join("tmp"),
            save_retries: 2,
            retry_delay: Duration::from_millis(1),
            dequeue_timeout: Duration::from_millis(50),
            blob_key_prefix: "bibs".to_string(),
        }
    }

    fn temp_artifacts(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn queue_sheds_when_full_and_preserves_order() {
        let (queue, jobs) = upload_channel(2);
        assert!(queue.enqueue(job("1")));
        assert!(queue.enqueue(job("2")));
        // Third enqueue is rejected immediately.
        assert!(!queue.enqueue(job("3")));
        assert_eq!(queue.depth(), 2);

        // Already-queued jobs come out in FIFO order.
        let first = match jobs.rx.recv().unwrap() {
            QueueMessage::Job(j) => j.bib,
            QueueMessage::Shutdown => panic!("unexpected sentinel"),
        };
        let second = match jobs.rx.recv().unwrap() {
            QueueMessage::Job(j) => j.bib,
            QueueMessage::Shutdown => panic!("unexpected sentinel"),
        };
        assert_eq!(first, bib("1"));
        assert_eq!(second, bib("2"));
    }

    #[test]
    fn worker_persists_job_and_cleans_temp() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = worker_config(dir.path());
        let temp_dir = cfg.temp_dir.clone();
        let store = Arc::new(Mutex::new(InMemoryRunnerStore::new()));
        let blobs = FilesystemBlobStore::new(dir.path().join("archive")).unwrap();
        let flag = ShutdownFlag::new();

        let (queue, jobs) = upload_channel(10);
        let handle =
            PersistenceWorker::spawn(cfg, store.clone(), blobs, jobs, flag.clone()).unwrap();

        assert!(queue.enqueue(job("5001")));
        queue.send_sentinel();
        assert!(handle.join_timeout(Duration::from_secs(5)).unwrap());

        let store = store.lock().unwrap();
        let records = store.records_for(&bib("5001"));
        assert_eq!(records.len(), 1);
        assert!(records[0].image_ref.contains("bibs/bib_5001_"));
        assert_eq!(records[0].image_sha256.len(), 64);
        assert!(records[0].guntime_s.is_none());

        // No temp artifact left behind once cleanup ran.
        assert!(temp_artifacts(&temp_dir).is_empty());
    }

    #[test]
    fn transmit_failure_still_cleans_up_and_worker_survives() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = worker_config(dir.path());
        let temp_dir = cfg.temp_dir.clone();
        let store = Arc::new(Mutex::new(InMemoryRunnerStore::new()));
        let flag = ShutdownFlag::new();

        let (queue, jobs) = upload_channel(10);
        let handle =
            PersistenceWorker::spawn(cfg, store.clone(), FailingBlobStore, jobs, flag.clone())
                .unwrap();

        // First job fails to transmit; the worker must still reach the
        // sentinel and terminate cleanly.
        assert!(queue.enqueue(job("41")));
        assert!(queue.enqueue(job("42")));
        queue.send_sentinel();
        assert!(handle.join_timeout(Duration::from_secs(5)).unwrap());

        let store = store.lock().unwrap();
        assert_eq!(store.total_records(), 0);
        assert!(temp_artifacts(&temp_dir).is_empty());
    }

    #[test]
    fn exhausted_local_write_abandons_job_but_not_worker() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = worker_config(dir.path());
        let temp_dir = cfg.temp_dir.clone();
        let store = Arc::new(Mutex::new(InMemoryRunnerStore::new()));
        let blobs = FilesystemBlobStore::new(dir.path().join("archive")).unwrap();
        let flag = ShutdownFlag::new();

        let (queue, jobs) = upload_channel(10);
        let handle =
            PersistenceWorker::spawn(cfg, store.clone(), blobs, jobs, flag.clone()).unwrap();

        // Pull the temp directory out from under the first job so every
        // write attempt fails; restore it for the second.
        std::fs::remove_dir_all(&temp_dir).unwrap();
        assert!(queue.enqueue(job("1000")));
        std::thread::sleep(Duration::from_millis(300));
        std::fs::create_dir_all(&temp_dir).unwrap();

        assert!(queue.enqueue(job("2000")));
        queue.send_sentinel();
        assert!(handle.join_timeout(Duration::from_secs(5)).unwrap());

        let store = store.lock().unwrap();
        assert_eq!(store.records_for(&bib("1000")).len(), 0);
        assert_eq!(store.records_for(&bib("2000")).len(), 1);
    }

    #[test]
    fn worker_exits_on_flag_without_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = worker_config(dir.path());
        let store = Arc::new(Mutex::new(InMemoryRunnerStore::new()));
        let blobs = FilesystemBlobStore::new(dir.path().join("archive")).unwrap();
        let flag = ShutdownFlag::new();

        let (_queue, jobs) = upload_channel(10);
        let handle = PersistenceWorker::spawn(cfg, store, blobs, jobs, flag.clone()).unwrap();

        // The dequeue timeout re-checks the flag, so the worker stops even
        // though no sentinel was ever sent.
        flag.stop();
        assert!(handle.join_timeout(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn unwritable_temp_dir_is_a_startup_error() {
        let dir = tempfile::tempdir().unwrap();
        let file_as_dir = dir.path().join("occupied");
        std::fs::write(&file_as_dir, b"not a directory").unwrap();

        let cfg = WorkerConfig {
            temp_dir: file_as_dir,
            ..worker_config(dir.path())
        };
        let store = InMemoryRunnerStore::new();
        let blobs = FilesystemBlobStore::new(dir.path().join("archive")).unwrap();
        let (_queue, jobs) = upload_channel(1);

        assert!(
            PersistenceWorker::spawn(cfg, store, blobs, jobs, ShutdownFlag::new()).is_err()
        );
    }
}
