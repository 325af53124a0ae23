//! Frame acquisition contract for host applications
//!
//! Wraps a [`DeviceSession`] and collapses its errors into `bool` and
//! empty-frame results after logging them.

use crate::config::CaptureConfig;
use crate::discovery::MediaTypeDescriptor;
use crate::driver::CaptureDriver;
use crate::error::Result;
use crate::session::{DeviceSession, NegotiatedFormat, SessionState};
use crate::v4l2::V4l2Device;
use litecam_video::DecodedFrame;
use std::path::PathBuf;

/// A streaming camera
pub struct Camera<D: CaptureDriver = V4l2Device> {
    session: DeviceSession<D>,
}

impl Camera<V4l2Device> {
    pub fn new() -> Self {
        Self::with_config(CaptureConfig::default())
    }

    /// Open device `index`, negotiate a format and start streaming
    pub fn open(&mut self, index: u32) -> bool {
        if self.session.is_open() {
            self.release();
        }

        if let Err(e) = self.session.open(index) {
            log::error!("Failed to open camera {}: {}", index, e);
            return false;
        }
        self.bring_up()
    }
}

impl Default for Camera<V4l2Device> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: CaptureDriver> Camera<D> {
    pub fn with_config(config: CaptureConfig) -> Self {
        Self {
            session: DeviceSession::new(config),
        }
    }

    /// Start streaming from an already opened driver handle
    pub fn open_with(&mut self, driver: D, path: impl Into<PathBuf>) -> bool {
        if self.session.is_open() {
            self.release();
        }

        if let Err(e) = self.session.open_with(driver, path) {
            log::error!("Failed to open camera: {}", e);
            return false;
        }
        self.bring_up()
    }

    fn bring_up(&mut self) -> bool {
        match self.start_streaming() {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to start camera {}: {}", self.session.path().display(), e);
                self.release();
                false
            }
        }
    }

    fn start_streaming(&mut self) -> Result<()> {
        let (width, height) = (self.session.config().width, self.session.config().height);
        self.session.negotiate(width, height)?;
        self.session.init_device()?;
        self.session.start_capture()
    }

    /// Change resolution, restarting the stream if it was running
    ///
    /// The driver may grant a different size; check [`Camera::format`]. On
    /// failure the previous format is restored and streaming resumes.
    pub fn set_resolution(&mut self, width: u32, height: u32) -> bool {
        if !self.session.is_open() {
            log::warn!("Device not opened");
            return false;
        }

        let was_streaming = self.session.state() == SessionState::Streaming;
        let previous = self.session.format();

        match self.restart_at(width, height, was_streaming) {
            Ok(_) => true,
            Err(e) => {
                log::error!("Failed to set resolution {}x{}: {}", width, height, e);
                if let Some(previous) = previous {
                    self.restore(previous, was_streaming);
                }
                false
            }
        }
    }

    fn restart_at(
        &mut self,
        width: u32,
        height: u32,
        was_streaming: bool,
    ) -> Result<NegotiatedFormat> {
        self.session.stop_capture()?;
        let format = self.session.set_resolution(width, height)?;
        self.session.init_device()?;
        if was_streaming {
            self.session.start_capture()?;
        }
        Ok(format)
    }

    /// Bring the stream back at `previous` after a rejected resolution change
    fn restore(&mut self, previous: NegotiatedFormat, was_streaming: bool) {
        match self.restart_at(previous.width, previous.height, was_streaming) {
            Ok(_) => log::info!(
                "Restored {}x{} after failed resolution change",
                previous.width,
                previous.height
            ),
            Err(e) => log::error!(
                "Failed to restore {}x{}: {}",
                previous.width,
                previous.height,
                e
            ),
        }
    }

    /// Capture one RGB888 frame; empty on failure
    pub fn capture_frame(&mut self) -> DecodedFrame {
        match self.session.capture_frame() {
            Ok(frame) => frame,
            Err(e) if e.is_fatal() => {
                log::error!("Failed to capture frame: {}", e);
                DecodedFrame::empty()
            }
            Err(e) => {
                log::warn!("Failed to capture frame: {}", e);
                DecodedFrame::empty()
            }
        }
    }

    /// Free a frame's pixel data, leaving the empty sentinel behind
    pub fn release_frame(&self, frame: &mut DecodedFrame) {
        frame.release();
    }

    pub fn list_supported_media_types(&mut self) -> Vec<MediaTypeDescriptor> {
        self.session.media_types()
    }

    /// Stop streaming and close the device; safe to repeat
    pub fn release(&mut self) {
        self.session.release();
    }

    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn format(&self) -> Option<NegotiatedFormat> {
        self.session.format()
    }

    pub fn session(&self) -> &DeviceSession<D> {
        &self.session
    }
}
