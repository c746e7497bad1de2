//! bibwatchd - race bib capture daemon
//!
//! This daemon:
//! 1. Acquires a camera from the configured device candidates
//! 2. Samples live frames through detect -> crop -> recognize -> normalize
//! 3. Confirms bibs by multi-frame consensus, once per bib per run
//! 4. Hands confirmations to a bounded queue drained by a single
//!    persistence worker (JPEG artifact + runner record)
//! 5. Shuts down cleanly on Ctrl-C: camera released, queue sentinel sent,
//!    worker joined with a bounded wait

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use clap::Parser;

use bibwatch::pipeline::PipelineControl;
use bibwatch::store::{BlobStore, FilesystemBlobStore, RunnerStore, SqliteRunnerStore};
use bibwatch::{
    build_detector, build_recognizer, install_signal_handler, upload_channel, BibwatchConfig,
    CameraSource, PersistenceWorker, Pipeline, ShutdownFlag, SystemProvider,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to a JSON config file.
    #[arg(long, env = "BIBWATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Camera device candidates in priority order (overrides config).
    #[arg(long = "device")]
    devices: Vec<String>,
    /// Detector backend spec: stub | tract:<model.onnx> (overrides config).
    #[arg(long)]
    detector: Option<String>,
    /// Recognizer spec (overrides config).
    #[arg(long)]
    recognizer: Option<String>,
    /// SQLite database path for runner records (overrides config).
    #[arg(long)]
    db_path: Option<String>,
    /// Local archive directory for image artifacts (overrides config).
    #[arg(long)]
    blob_dir: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = BibwatchConfig::load_path(args.config.as_deref())?;
    if !args.devices.is_empty() {
        cfg.camera.devices = args.devices.clone();
    }
    if let Some(detector) = args.detector {
        cfg.detection.detector = detector;
    }
    if let Some(recognizer) = args.recognizer {
        cfg.detection.recognizer = recognizer;
    }
    if let Some(db_path) = args.db_path {
        cfg.store.db_path = db_path;
    }
    if let Some(blob_dir) = args.blob_dir {
        cfg.store.blob_dir = blob_dir;
    }
    cfg.validate()?;

    let flag = ShutdownFlag::new();
    install_signal_handler(&flag)?;

    // The runner store is shared: the persistence worker inserts records
    // while the pipeline's dedup gate runs existence checks on the same
    // backing store.
    let runner_store: Arc<Mutex<Box<dyn RunnerStore>>> =
        Arc::new(Mutex::new(build_runner_store(&cfg)?));
    let blob_store = build_blob_store(&cfg)?;

    let (queue, jobs) = upload_channel(cfg.upload.queue_capacity);
    let worker = PersistenceWorker::spawn(
        cfg.worker_config(),
        runner_store.clone(),
        blob_store,
        jobs,
        flag.clone(),
    )?;

    let detector = build_detector(&cfg.detection.detector, cfg.camera.width, cfg.camera.height)?;
    let recognizer = build_recognizer(&cfg.detection.recognizer)?;
    let camera = CameraSource::new(cfg.camera_config(), Box::new(SystemProvider));

    let mut pipeline = Pipeline::new(
        camera,
        detector,
        recognizer,
        Box::new(runner_store),
        queue,
        cfg.detection.clone(),
    );
    spawn_command_listener(pipeline.control(), flag.clone());

    log::info!(
        "bibwatchd running: devices={:?}, detector={}, recognizer={}, \
         sampling every {} frames, queue capacity {}",
        cfg.camera.devices,
        cfg.detection.detector,
        cfg.detection.recognizer,
        cfg.detection.process_every_n_frames,
        cfg.upload.queue_capacity,
    );

    let run_result = pipeline.run(&flag);
    // The pipeline may have stopped on its own (camera failed terminally);
    // make sure the worker sees the shutdown either way.
    flag.stop();
    worker.join_timeout(cfg.upload.worker_join_timeout)?;

    run_result
}

fn build_runner_store(cfg: &BibwatchConfig) -> Result<Box<dyn RunnerStore>> {
    if let Some(url) = &cfg.store.remote_url {
        #[cfg(feature = "remote-http")]
        {
            log::info!("runner records go to remote store {}", url);
            return Ok(Box::new(bibwatch::store::http::HttpRunnerStore::new(url)?));
        }
        #[cfg(not(feature = "remote-http"))]
        {
            let _ = url;
            anyhow::bail!("store.remote_url requires the remote-http feature");
        }
    }
    log::info!("runner records go to {}", cfg.store.db_path);
    Ok(Box::new(SqliteRunnerStore::open(&cfg.store.db_path)?))
}

fn build_blob_store(cfg: &BibwatchConfig) -> Result<Box<dyn BlobStore>> {
    if let Some(url) = &cfg.store.remote_url {
        #[cfg(feature = "remote-http")]
        {
            return Ok(Box::new(bibwatch::store::http::HttpBlobStore::new(url)?));
        }
        #[cfg(not(feature = "remote-http"))]
        {
            let _ = url;
            anyhow::bail!("store.remote_url requires the remote-http feature");
        }
    }
    Ok(Box::new(FilesystemBlobStore::new(&cfg.store.blob_dir)?))
}

/// Operator commands on stdin, one per line. Exits quietly on EOF so a
/// detached daemon pays nothing for it.
fn spawn_command_listener(control: PipelineControl, flag: ShutdownFlag) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut lines = stdin.lock();
        let mut line = String::new();
        while flag.is_running() {
            line.clear();
            match lines.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            match line.trim() {
                "r" | "clear-confirmed" => {
                    if let Err(err) = control.clear_confirmed() {
                        log::error!("clear-confirmed failed: {err:#}");
                    }
                }
                "c" | "clear-tracking" => {
                    if let Err(err) = control.clear_tracking() {
                        log::error!("clear-tracking failed: {err:#}");
                    }
                }
                "q" | "quit" => {
                    flag.stop();
                    break;
                }
                "" => {}
                other => {
                    log::warn!(
                        "unknown command '{other}' (r=clear-confirmed, c=clear-tracking, q=quit)"
                    );
                }
            }
        }
    });
}
