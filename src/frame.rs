//! Frame representation and region cropping.
//!
//! Frames are plain RGB pixel buffers captured by the ingest layer. The
//! pipeline crops candidate bib regions out of them (with padding, clamped
//! to the frame bounds) and the persistence worker encodes them to JPEG.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use sha2::{Digest, Sha256};

use crate::detect::BibBox;

/// JPEG quality used for persisted artifacts.
const JPEG_QUALITY: u8 = 95;

/// Minimum width/height of a crop worth running recognition on. Anything
/// smaller carries too few pixels for the recognizer to read digits from.
pub const MIN_CROP_DIM: u32 = 20;

/// Padding in pixels added around a detection box before cropping.
pub const CROP_PADDING: u32 = 5;

/// One captured video frame (RGB, row-major, 3 bytes per pixel).
#[derive(Clone, Debug)]
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture time in seconds since the Unix epoch.
    pub captured_at_s: u64,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        if expected == 0 {
            return Err(anyhow!("frame must not be empty"));
        }
        Ok(Self {
            pixels,
            width,
            height,
            captured_at_s: now_s()?,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Crop a padded region around a detection box.
    ///
    /// The padding is clamped to the frame bounds. Returns `None` when the
    /// resulting crop is smaller than `MIN_CROP_DIM` in either dimension;
    /// such regions are skipped, not treated as errors.
    pub fn crop_padded(&self, bbox: &BibBox) -> Option<Frame> {
        let x1 = bbox.x1.saturating_sub(CROP_PADDING);
        let y1 = bbox.y1.saturating_sub(CROP_PADDING);
        let x2 = (bbox.x2 + CROP_PADDING).min(self.width);
        let y2 = (bbox.y2 + CROP_PADDING).min(self.height);

        let w = x2.saturating_sub(x1);
        let h = y2.saturating_sub(y1);
        if w < MIN_CROP_DIM || h < MIN_CROP_DIM {
            return None;
        }

        let mut pixels = Vec::with_capacity((w * h * 3) as usize);
        for row in y1..y2 {
            let start = ((row * self.width + x1) * 3) as usize;
            let end = start + (w * 3) as usize;
            pixels.extend_from_slice(&self.pixels[start..end]);
        }

        Some(Frame {
            pixels,
            width: w,
            height: h,
            captured_at_s: self.captured_at_s,
        })
    }

    /// Encode the frame as JPEG bytes.
    pub fn encode_jpeg(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
        encoder
            .write_image(
                &self.pixels,
                self.width,
                self.height,
                ExtendedColorType::Rgb8,
            )
            .context("encode frame as JPEG")?;
        Ok(out)
    }
}

/// SHA-256 of an encoded artifact, hex-encoded. Recorded alongside each
/// runner record so the stored image can be integrity-checked later.
pub fn artifact_checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub(crate) fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}
