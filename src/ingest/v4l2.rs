#![cfg(feature = "ingest-v4l2")]

//! V4L2 capture session.
//!
//! Opens a local device node (e.g. /dev/video0), negotiates RGB format,
//! resolution and frame rate, and captures frames through a memory-mapped
//! buffer stream.

use std::time::Duration;

use anyhow::{Context, Result};
use ouroboros::self_referencing;

use crate::frame::Frame;
use crate::ingest::camera::{CameraConfig, CaptureSession};

pub(crate) struct DeviceSession {
    device_path: String,
    state: DeviceState,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl DeviceSession {
    pub(crate) fn open(device_path: &str, cfg: &CameraConfig) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(device_path)
            .with_context(|| format!("open v4l2 device {}", device_path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = cfg.width;
        format.height = cfg.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("failed to set format on {}: {}", device_path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        if cfg.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(cfg.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("failed to set fps on {}: {}", device_path, err);
            }
        }

        let active_width = format.width;
        let active_height = format.height;
        let buffer_depth = cfg.buffer_depth.max(1);

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, buffer_depth)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "v4l2 session open: {} ({}x{})",
            device_path,
            active_width,
            active_height
        );

        Ok(Self {
            device_path: device_path.to_string(),
            state,
            active_width,
            active_height,
        })
    }
}

impl CaptureSession for DeviceSession {
    // The driver bounds the wait through the negotiated frame interval;
    // the mmap stream surfaces stalls as read errors.
    fn read_frame(&mut self, _timeout: Duration) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let pixels = self.state.with_stream_mut(|stream| -> Result<Vec<u8>> {
            let (buf, _meta) = stream.next().context("capture v4l2 frame")?;
            Ok(buf.to_vec())
        })?;
        Frame::new(pixels, self.active_width, self.active_height)
    }

    fn descriptor(&self) -> String {
        format!(
            "{} ({}x{})",
            self.device_path, self.active_width, self.active_height
        )
    }
}
