use anyhow::{anyhow, Result};

/// Axis-aligned bounding box in frame pixel coordinates.
///
/// Invariant: `x2 > x1` and `y2 > y1`, enforced at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BibBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BibBox {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Result<Self> {
        if x2 <= x1 || y2 <= y1 {
            return Err(anyhow!(
                "degenerate bounding box ({},{})-({},{})",
                x1,
                y1,
                x2,
                y2
            ));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }
}

/// One candidate bib region from a detector backend.
///
/// Detections are ephemeral: produced and consumed within a single frame's
/// processing cycle.
#[derive(Clone, Copy, Debug)]
pub struct Detection {
    pub bbox: BibBox,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f32,
}
