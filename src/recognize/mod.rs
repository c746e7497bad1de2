//! Text recognition over cropped bib regions.
//!
//! Recognizers are external collaborators: given an image region, they
//! return zero or more `(text, confidence)` candidates. The pipeline treats
//! them as pure with respect to pipeline state.

use anyhow::{anyhow, Result};

/// One raw recognition candidate for a region.
///
/// Ephemeral: zero or more are produced per detection and consumed by the
/// normalizer within the same frame cycle.
#[derive(Clone, Debug)]
pub struct RecognitionCandidate {
    pub text: String,
    /// Recognizer confidence in `[0, 1]`.
    pub confidence: f32,
}

/// Text recognizer trait.
///
/// Implementations must treat the pixel slice as read-only and ephemeral.
pub trait TextRecognizer: Send {
    /// Recognizer identifier.
    fn name(&self) -> &'static str;

    /// Read text candidates out of one RGB region. May return an empty list.
    fn recognize(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<RecognitionCandidate>>;
}

/// Stub recognizer for testing and `stub://` camera demos.
///
/// Derives a deterministic pseudo bib number from the region content, so a
/// stable region "reads" the same number on every frame it appears in.
/// That repetition is what the consensus tracker needs to confirm.
pub struct StubRecognizer;

impl StubRecognizer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StubRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextRecognizer for StubRecognizer {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn recognize(
        &mut self,
        pixels: &[u8],
        _width: u32,
        _height: u32,
    ) -> Result<Vec<RecognitionCandidate>> {
        if pixels.is_empty() {
            return Ok(vec![]);
        }
        let sum: u64 = pixels.iter().step_by(97).map(|&p| p as u64).sum();
        let number = sum % 99_999 + 1;
        Ok(vec![RecognitionCandidate {
            text: number.to_string(),
            confidence: 0.9,
        }])
    }
}

/// Scripted recognizer for tests: returns pre-queued responses in order and
/// errors when the script runs out.
pub struct ScriptedRecognizer {
    script: std::collections::VecDeque<Vec<RecognitionCandidate>>,
}

impl ScriptedRecognizer {
    pub fn new(script: Vec<Vec<RecognitionCandidate>>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

impl TextRecognizer for ScriptedRecognizer {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn recognize(
        &mut self,
        _pixels: &[u8],
        _width: u32,
        _height: u32,
    ) -> Result<Vec<RecognitionCandidate>> {
        self.script
            .pop_front()
            .ok_or_else(|| anyhow!("scripted recognizer exhausted"))
    }
}

/// Build a recognizer from a config spec string. Only `"stub"` is built in;
/// real OCR engines plug in behind this factory.
pub fn build_recognizer(spec: &str) -> Result<Box<dyn TextRecognizer>> {
    match spec {
        "stub" => Ok(Box::new(StubRecognizer::new())),
        other => Err(anyhow!("unknown recognizer spec '{}'", other)),
    }
}
