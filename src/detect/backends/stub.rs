use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BibBox, Detection};

/// Stub backend for testing and `stub://` camera demos.
///
/// Reports a single centered region whenever the frame content changes from
/// the previous call, which pairs with the synthetic camera's scene cycling.
pub struct StubBackend {
    last_hash: Option<[u8; 32]>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self { last_hash: None }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>> {
        let current_hash: [u8; 32] = Sha256::digest(pixels).into();

        let changed = match self.last_hash {
            Some(prev) => prev != current_hash,
            None => false,
        };
        self.last_hash = Some(current_hash);

        if !changed || width < 4 || height < 4 {
            return Ok(vec![]);
        }

        // Center quarter of the frame stands in for a torso-mounted bib.
        let bbox = BibBox::new(
            width / 4,
            height / 4,
            width / 4 + width / 2,
            height / 4 + height / 2,
        )?;
        Ok(vec![Detection {
            bbox,
            confidence: 0.85,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_yields_no_detection() {
        let mut backend = StubBackend::new();
        let pixels = vec![0u8; 64 * 48 * 3];
        let dets = backend.detect(&pixels, 64, 48).unwrap();
        assert!(dets.is_empty());
    }

    #[test]
    fn changed_frame_yields_centered_detection() {
        let mut backend = StubBackend::new();
        let a = vec![0u8; 64 * 48 * 3];
        let b = vec![1u8; 64 * 48 * 3];
        backend.detect(&a, 64, 48).unwrap();
        let dets = backend.detect(&b, 64, 48).unwrap();
        assert_eq!(dets.len(), 1);
        let bbox = dets[0].bbox;
        assert_eq!(bbox.width(), 32);
        assert_eq!(bbox.height(), 24);
    }

    #[test]
    fn static_scene_stays_quiet() {
        let mut backend = StubBackend::new();
        let pixels = vec![7u8; 64 * 48 * 3];
        backend.detect(&pixels, 64, 48).unwrap();
        assert!(backend.detect(&pixels, 64, 48).unwrap().is_empty());
    }
}
