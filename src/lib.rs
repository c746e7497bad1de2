//! bibwatch: race bib capture kernel.
//!
//! Watches a camera pointed at a race checkpoint, detects bib regions in
//! live frames, reads the numbers, and records each runner exactly once per
//! run: a confirmed sighting writes a JPEG artifact plus a runner record
//! through a bounded background upload queue.
//!
//! The crate is organized as a capture pipeline with swappable edges:
//!
//! - [`ingest`] acquires frames and survives camera faults
//! - [`detect`] and [`recognize`] are pluggable perception backends
//! - [`normalize`], [`track`], and [`dedup`] turn noisy per-frame readings
//!   into at-most-one confirmation per bib
//! - [`upload`] and [`store`] persist confirmations off the capture thread
//! - [`pipeline`] wires the above into the live loop driven by `bibwatchd`
//!
//! Perception backends and remote stores are feature-gated; the default
//! build runs end to end on deterministic stubs, which is also how the
//! integration tests exercise the full path.

pub mod config;
pub mod dedup;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod normalize;
pub mod pipeline;
pub mod recognize;
pub mod retry;
pub mod shutdown;
pub mod store;
pub mod track;
pub mod upload;

pub use config::BibwatchConfig;
pub use dedup::{DedupGate, GateOutcome};
pub use detect::{build_detector, BibBox, Detection, DetectorBackend};
pub use frame::Frame;
pub use ingest::{CameraConfig, CameraSource, SourceState, SystemProvider};
pub use normalize::{normalize_bib, BibNumber};
pub use pipeline::{Pipeline, PipelineControl, PipelineStats};
pub use recognize::{build_recognizer, RecognitionCandidate, TextRecognizer};
pub use shutdown::{install_signal_handler, ShutdownFlag};
pub use store::{
    BlobStore, FilesystemBlobStore, InMemoryRunnerStore, RunnerRecord, RunnerStore,
    SqliteRunnerStore,
};
pub use track::ConsensusTracker;
pub use upload::{upload_channel, PersistenceWorker, UploadJob, UploadQueue, WorkerConfig};
