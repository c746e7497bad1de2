#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BibBox, Detection};

/// Tract-based bib detector for ONNX models.
///
/// Loads a local single-class detection model and runs inference on RGB
/// frames. Expects YOLO-style output rows of `[cx, cy, w, h, score]` in
/// pixel coordinates of the model input. No network I/O; no disk writes
/// beyond model loading.
pub struct TractBackend {
    model: TypedSimplePlan<TypedModel>,
    width: u32,
    height: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
        })
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        if width != self.width || height != self.height {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                width,
                height,
                self.width,
                self.height
            ));
        }

        let expected_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            ));
        }

        let width = width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );

        Ok(input.into_tensor())
    }

    fn extract_detections(&self, outputs: TVec<TValue>) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let stride = view.shape().last().copied().unwrap_or(0);
        if stride < 5 {
            return Ok(Vec::new());
        }
        let flat = view
            .as_slice()
            .ok_or_else(|| anyhow!("model output tensor is not contiguous"))?;

        let mut detections = Vec::new();
        for row in flat.chunks_exact(stride) {
            let (cx, cy, w, h, score) = (row[0], row[1], row[2], row[3], row[4]);
            if !score.is_finite() || score <= 0.0 {
                continue;
            }
            let x1 = (cx - w / 2.0).max(0.0) as u32;
            let y1 = (cy - h / 2.0).max(0.0) as u32;
            let x2 = ((cx + w / 2.0) as u32).min(self.width);
            let y2 = ((cy + h / 2.0) as u32).min(self.height);
            let Ok(bbox) = BibBox::new(x1, y1, x2, y2) else {
                continue;
            };
            detections.push(Detection {
                bbox,
                confidence: score.clamp(0.0, 1.0),
            });
        }
        Ok(detections)
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_detections(outputs)
    }
}
