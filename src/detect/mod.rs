//! Bib region detection.
//!
//! Detectors are external collaborators: given a frame, they return zero or
//! more candidate regions with confidence scores. The pipeline specifies
//! only this contract; how a backend computes its output is its own concern.

mod backend;
mod backends;
mod result;

use anyhow::{anyhow, Result};

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{BibBox, Detection};

/// Build a detector backend from a config spec string.
///
/// Supported specs:
/// - `"stub"`: pixel-hash stub detector (tests, demos)
/// - `"tract:<model.onnx>"`: ONNX model via tract (feature `backend-tract`)
///
/// An unknown or unavailable backend is an unrecoverable startup error; the
/// daemon declines to start rather than running with silent partial function.
pub fn build_detector(spec: &str, width: u32, height: u32) -> Result<Box<dyn DetectorBackend>> {
    if spec == "stub" {
        return Ok(Box::new(StubBackend::new()));
    }
    if let Some(model_path) = spec.strip_prefix("tract:") {
        #[cfg(feature = "backend-tract")]
        {
            return Ok(Box::new(TractBackend::new(model_path, width, height)?));
        }
        #[cfg(not(feature = "backend-tract"))]
        {
            let _ = model_path;
            let _ = (width, height);
            return Err(anyhow!(
                "detector spec '{}' requires the backend-tract feature",
                spec
            ));
        }
    }
    Err(anyhow!("unknown detector spec '{}'", spec))
}
