//! Frame acquisition.
//!
//! This module owns the camera-facing side of the pipeline:
//! - `CameraSource`: the acquisition state machine (probe, read, degrade,
//!   reconnect) over a prioritized candidate list
//! - `CaptureProvider` / `CaptureSession`: the seam for real devices,
//!   synthetic `stub://` sources, and test fakes
//! - A V4L2 device provider (feature: ingest-v4l2)
//!
//! All sources produce `Frame` instances consumed by the frame loop. Every
//! wait in here is bounded and cancellable through the shutdown flag; the
//! state machine never blocks its caller longer than one attempt's timeout.

pub mod camera;
#[cfg(feature = "ingest-v4l2")]
pub(crate) mod v4l2;

pub use camera::{
    CameraConfig, CameraSource, CaptureProvider, CaptureSession, SourceState, SystemProvider,
};
