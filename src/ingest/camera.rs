//! Camera acquisition state machine.
//!
//! `Searching → Ready → Reading ⇄ Degraded → Reconnecting → Ready | Failed`
//!
//! Searching probes a prioritized list of device candidates with a short
//! validation burst. Read failures degrade into bounded immediate retries;
//! exhausting them releases the session and reconnects after a cooldown.
//! Exhausting every candidate is terminal: a truly absent device is
//! reported, not spun on.

use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::frame::Frame;
use crate::shutdown::ShutdownFlag;

/// Configuration for camera acquisition.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Prioritized device candidates, tried in order while Searching.
    /// `stub://<name>` selects the synthetic source; `/dev/video*` selects
    /// a V4L2 device (feature: ingest-v4l2).
    pub devices: Vec<String>,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    /// Driver-side buffer depth; kept shallow so frames stay fresh.
    pub buffer_depth: u32,
    /// Bounded wait for one frame read.
    pub read_timeout: Duration,
    /// Validation burst length while probing a candidate.
    pub probe_frames: u32,
    /// Minimum successful reads out of `probe_frames` to accept a candidate.
    pub probe_min_success: u32,
    /// Immediate retries while Degraded, before reconnecting.
    pub read_retries: u32,
    /// Backoff between degraded read retries.
    pub retry_backoff: Duration,
    /// Cooldown before re-probing after a session is released.
    pub reconnect_cooldown: Duration,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            devices: vec!["stub://start_line".to_string()],
            width: 640,
            height: 480,
            target_fps: 15,
            buffer_depth: 1,
            read_timeout: Duration::from_secs(5),
            probe_frames: 3,
            probe_min_success: 2,
            read_retries: 3,
            retry_backoff: Duration::from_millis(200),
            reconnect_cooldown: Duration::from_secs(2),
        }
    }
}

/// A live capture session. Created on successful open, destroyed and
/// replaced (never repaired in place) on irrecoverable read failure.
pub trait CaptureSession: Send {
    /// Blocking read of one frame, bounded by `timeout`.
    fn read_frame(&mut self, timeout: Duration) -> Result<Frame>;

    /// Human-readable device identity for logs.
    fn descriptor(&self) -> String;
}

/// Opens capture sessions for device candidates.
pub trait CaptureProvider: Send {
    fn open(&mut self, device: &str, cfg: &CameraConfig) -> Result<Box<dyn CaptureSession>>;
}

/// Acquisition states, exposed for logging and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceState {
    Searching,
    Ready,
    Reading,
    Degraded,
    Reconnecting,
    Failed,
}

/// Camera source: owns the current session and the acquisition state.
///
/// The session handle is owned exclusively by the foreground frame loop;
/// no other component touches it.
pub struct CameraSource {
    cfg: CameraConfig,
    provider: Box<dyn CaptureProvider>,
    session: Option<Box<dyn CaptureSession>>,
    state: SourceState,
    frames_read: u64,
    reconnects: u64,
}

impl CameraSource {
    pub fn new(cfg: CameraConfig, provider: Box<dyn CaptureProvider>) -> Self {
        Self {
            cfg,
            provider,
            session: None,
            state: SourceState::Searching,
            frames_read: 0,
            reconnects: 0,
        }
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Searching: probe candidates in priority order until one passes the
    /// validation burst.
    ///
    /// Returns Ok(true) with a live session, Ok(false) when shutdown was
    /// requested mid-search, and Err when every candidate is exhausted
    /// (terminal `Failed`).
    pub fn acquire(&mut self, flag: &ShutdownFlag) -> Result<bool> {
        self.state = SourceState::Searching;
        self.session = None;

        let devices = self.cfg.devices.clone();
        for device in &devices {
            if !flag.is_running() {
                return Ok(false);
            }
            log::info!("probing camera candidate {}", device);
            let mut session = match self.provider.open(device, &self.cfg) {
                Ok(session) => session,
                Err(err) => {
                    log::warn!("candidate {} failed to open: {}", device, err);
                    continue;
                }
            };

            let successes = self.validation_burst(session.as_mut(), flag);
            if !flag.is_running() {
                return Ok(false);
            }
            if successes >= self.cfg.probe_min_success {
                log::info!(
                    "camera ready: {} ({}/{} probe reads)",
                    session.descriptor(),
                    successes,
                    self.cfg.probe_frames
                );
                self.session = Some(session);
                self.state = SourceState::Ready;
                return Ok(true);
            }
            log::warn!(
                "candidate {} rejected: {}/{} probe reads succeeded",
                device,
                successes,
                self.cfg.probe_frames
            );
        }

        self.state = SourceState::Failed;
        Err(anyhow!(
            "no working camera found among {} candidates",
            devices.len()
        ))
    }

    fn validation_burst(&self, session: &mut dyn CaptureSession, flag: &ShutdownFlag) -> u32 {
        let mut successes = 0;
        for _ in 0..self.cfg.probe_frames {
            if !flag.is_running() {
                break;
            }
            if session.read_frame(self.cfg.read_timeout).is_ok() {
                successes += 1;
            }
        }
        successes
    }

    /// Read the next frame, degrading and reconnecting as needed.
    ///
    /// Returns Ok(None) when shutdown was requested; Err only when the
    /// source is terminally `Failed`.
    pub fn next_frame(&mut self, flag: &ShutdownFlag) -> Result<Option<Frame>> {
        loop {
            if !flag.is_running() {
                return Ok(None);
            }
            if self.session.is_none() {
                match self.acquire(flag)? {
                    true => {}
                    false => return Ok(None),
                }
            }
            // acquire() either set a session or returned above.
            let session = self
                .session
                .as_mut()
                .ok_or_else(|| anyhow!("camera session missing after acquire"))?;

            self.state = SourceState::Reading;
            match session.read_frame(self.cfg.read_timeout) {
                Ok(frame) => {
                    self.frames_read += 1;
                    return Ok(Some(frame));
                }
                Err(err) => {
                    log::warn!("frame read failed: {}", err);
                    if let Some(frame) = self.degraded_retries(flag) {
                        return Ok(Some(frame));
                    }
                    if !flag.is_running() {
                        return Ok(None);
                    }
                    self.reconnect(flag)?;
                    if !flag.is_running() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Degraded: a bounded number of immediate retries with short backoff.
    fn degraded_retries(&mut self, flag: &ShutdownFlag) -> Option<Frame> {
        self.state = SourceState::Degraded;
        let session = self.session.as_mut()?;
        for attempt in 1..=self.cfg.read_retries {
            if !flag.sleep_interruptible(self.cfg.retry_backoff) {
                return None;
            }
            match session.read_frame(self.cfg.read_timeout) {
                Ok(frame) => {
                    log::info!("frame read recovered on retry {}", attempt);
                    self.state = SourceState::Reading;
                    self.frames_read += 1;
                    return Some(frame);
                }
                Err(err) => {
                    log::warn!(
                        "frame read retry {}/{} failed: {}",
                        attempt,
                        self.cfg.read_retries,
                        err
                    );
                }
            }
        }
        None
    }

    /// Reconnecting: release the session, wait out the cooldown, re-probe.
    fn reconnect(&mut self, flag: &ShutdownFlag) -> Result<()> {
        log::warn!("camera connection lost, reconnecting");
        self.state = SourceState::Reconnecting;
        self.session = None;
        self.reconnects += 1;
        if !flag.sleep_interruptible(self.cfg.reconnect_cooldown) {
            return Ok(());
        }
        self.acquire(flag).map(|_| ())
    }

    /// Release the capture session (shutdown path).
    pub fn release(&mut self) {
        self.session = None;
    }
}

// ----------------------------------------------------------------------------
// System provider: stub:// synthetic sources plus real devices
// ----------------------------------------------------------------------------

/// Default provider: `stub://` synthetic sessions always, `/dev/video*`
/// devices when the ingest-v4l2 feature is enabled.
pub struct SystemProvider;

impl CaptureProvider for SystemProvider {
    fn open(&mut self, device: &str, cfg: &CameraConfig) -> Result<Box<dyn CaptureSession>> {
        if device.starts_with("stub://") {
            return Ok(Box::new(SyntheticSession::new(device, cfg)));
        }
        #[cfg(feature = "ingest-v4l2")]
        {
            return Ok(Box::new(crate::ingest::v4l2::DeviceSession::open(
                device, cfg,
            )?));
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            Err(anyhow!(
                "device {} requires the ingest-v4l2 feature",
                device
            ))
        }
    }
}

/// Synthetic capture session for tests and demos.
///
/// Generates a deterministic pixel pattern; the "scene" shifts every 50
/// frames so downstream stub collaborators see occasional change.
struct SyntheticSession {
    device: String,
    width: u32,
    height: u32,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticSession {
    fn new(device: &str, cfg: &CameraConfig) -> Self {
        Self {
            device: device.to_string(),
            width: cfg.width,
            height: cfg.height,
            frame_count: 0,
            scene_state: 0,
        }
    }
}

impl CaptureSession for SyntheticSession {
    fn read_frame(&mut self, _timeout: Duration) -> Result<Frame> {
        self.frame_count += 1;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let pixel_count = (self.width * self.height * 3) as usize;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count / 50 + self.scene_state as u64) % 256) as u8;
        }
        Frame::new(pixels, self.width, self.height)
    }

    fn descriptor(&self) -> String {
        format!("{} (synthetic)", self.device)
    }
}
