use anyhow::Result;

use crate::detect::result::Detection;

/// Detector backend trait.
///
/// Backends map a frame to zero or more candidate bib regions. The pipeline
/// treats them as pure with respect to pipeline state: any internal model
/// state (weights, warm caches) is the backend's concern.
///
/// Implementations must treat the pixel slice as read-only and ephemeral,
/// and must not retain it beyond the `detect` call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one RGB frame. May return an empty list.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, called once before the frame loop starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
