//! Capture session: device lifecycle, format negotiation and frame capture
//!
//! ```text
//! Closed -> Opened -> FormatNegotiated -> Streaming -> Stopped -> Closed
//! ```
//!
//! `capture_frame` is only valid while `Streaming`. `release` is valid from
//! every state and always ends in `Closed`.

use crate::buffer_pool::{BufferPool, Ownership, PoolStats};
use crate::config::CaptureConfig;
use crate::discovery::{enumerate_media_types, MediaTypeDescriptor};
use crate::driver::{Capabilities, CaptureDriver, PixFormat};
use crate::error::{CaptureError, Result};
use crate::v4l2::V4l2Device;
use litecam_video::{
    decode_jpeg_to_rgb888, fourcc_to_string, is_jpeg, yuyv_to_rgb888, DecodedFrame,
    PixelEncoding, FOURCC_MJPEG, FOURCC_YUYV,
};
use std::path::{Path, PathBuf};

/// Lifecycle state of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opened,
    FormatNegotiated,
    Streaming,
    Stopped,
}

/// Format the driver actually granted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub width: u32,
    pub height: u32,
    pub encoding: PixelEncoding,
    /// Granted fourcc, kept even when the encoding is unknown
    pub fourcc: u32,
}

impl NegotiatedFormat {
    /// Size of one decoded RGB888 frame
    pub fn frame_size(&self) -> usize {
        DecodedFrame::byte_size_for(self.width, self.height)
    }
}

impl From<PixFormat> for NegotiatedFormat {
    fn from(granted: PixFormat) -> Self {
        Self {
            width: granted.width,
            height: granted.height,
            encoding: PixelEncoding::from_fourcc(granted.fourcc),
            fourcc: granted.fourcc,
        }
    }
}

/// Exclusive owner of one open capture device and its buffer pool
///
/// Not thread-safe by itself: calls must be serialized by the owner.
pub struct DeviceSession<D: CaptureDriver> {
    driver: Option<D>,
    path: PathBuf,
    state: SessionState,
    format: Option<NegotiatedFormat>,
    capabilities: Option<Capabilities>,
    pool: BufferPool<D::Mapping>,
    config: CaptureConfig,
}

fn require_driver<'a, D>(
    driver: &'a mut Option<D>,
    operation: &'static str,
    state: SessionState,
) -> Result<&'a mut D> {
    driver
        .as_mut()
        .ok_or_else(|| CaptureError::invalid_state(operation, state))
}

impl DeviceSession<V4l2Device> {
    /// Open `/dev/video<index>` (or the configured prefix)
    pub fn open(&mut self, index: u32) -> Result<()> {
        if self.state != SessionState::Closed {
            return Err(CaptureError::invalid_state("open", self.state));
        }

        let path = self.config.device_path(index);
        let device =
            V4l2Device::open(&path).map_err(|e| CaptureError::unavailable(&path, e.to_string()))?;
        self.open_with(device, path)
    }
}

impl<D: CaptureDriver> DeviceSession<D> {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            driver: None,
            path: PathBuf::new(),
            state: SessionState::Closed,
            format: None,
            capabilities: None,
            pool: BufferPool::new(),
            config,
        }
    }

    /// Take ownership of an open driver handle
    ///
    /// Fails with `DeviceUnavailable` (and drops the handle) if the device
    /// cannot report its capabilities or is not a capture device.
    pub fn open_with(&mut self, mut driver: D, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        if self.state != SessionState::Closed {
            return Err(CaptureError::invalid_state("open", self.state));
        }

        let caps = driver.query_capabilities().map_err(|e| {
            CaptureError::unavailable(&path, format!("capability query failed: {}", e))
        })?;
        if !caps.supports_capture() {
            return Err(CaptureError::unavailable(&path, "not a video capture device"));
        }

        log::info!("Driver: {} Card: {} ({})", caps.driver, caps.card, path.display());

        self.driver = Some(driver);
        self.path = path;
        self.capabilities = Some(caps);
        self.state = SessionState::Opened;
        Ok(())
    }

    /// Negotiate a packed YUV format, falling back to MJPEG
    ///
    /// The granted resolution and encoding are adopted as-is. If neither the
    /// packed request nor the single MJPEG fallback yields a known encoding
    /// the session still proceeds; frames will decode as garbage. Only a
    /// failure of the first request is fatal, and closes the session.
    pub fn negotiate(&mut self, width: u32, height: u32) -> Result<NegotiatedFormat> {
        match self.state {
            SessionState::Opened | SessionState::FormatNegotiated | SessionState::Stopped => {}
            state => return Err(CaptureError::invalid_state("negotiate", state)),
        }
        self.uninit_device();

        let request = PixFormat::new(width, height, FOURCC_YUYV);
        let result = require_driver(&mut self.driver, "negotiate", self.state)?.set_format(request);
        let granted = match result {
            Ok(granted) => NegotiatedFormat::from(granted),
            Err(e) => {
                log::error!("Error setting format on {}: {}", self.path.display(), e);
                self.release();
                return Err(CaptureError::FormatNegotiation(e));
            }
        };

        let format = match granted.encoding {
            PixelEncoding::Unknown => {
                let driver = require_driver(&mut self.driver, "negotiate", self.state)?;
                fallback_to_compressed(driver, granted)
            }
            encoding => {
                log::info!("Negotiated format: {} {}x{}", encoding, granted.width, granted.height);
                granted
            }
        };

        self.format = Some(format);
        self.state = SessionState::FormatNegotiated;
        Ok(format)
    }

    /// Renegotiate the resolution, keeping the negotiated fourcc
    ///
    /// Not valid while streaming. An initialized buffer pool is torn down
    /// first; call `init_device` again before restarting capture.
    pub fn set_resolution(&mut self, width: u32, height: u32) -> Result<NegotiatedFormat> {
        let current = match (self.state, self.format) {
            (SessionState::FormatNegotiated | SessionState::Stopped, Some(format)) => format,
            (state, _) => return Err(CaptureError::invalid_state("set_resolution", state)),
        };
        self.uninit_device();

        let request = PixFormat::new(width, height, current.fourcc);
        let granted = require_driver(&mut self.driver, "set_resolution", self.state)?
            .set_format(request)
            .map_err(CaptureError::FormatNegotiation)?;

        let format = NegotiatedFormat::from(granted);
        log::info!(
            "Resolution set: {} {}x{} (requested {}x{})",
            fourcc_to_string(format.fourcc),
            format.width,
            format.height,
            width,
            height
        );

        self.format = Some(format);
        self.state = SessionState::FormatNegotiated;
        Ok(format)
    }

    /// Allocate, map and queue the buffer pool
    pub fn init_device(&mut self) -> Result<()> {
        match self.state {
            SessionState::FormatNegotiated | SessionState::Stopped => {}
            state => return Err(CaptureError::invalid_state("init_device", state)),
        }

        let driver = require_driver(&mut self.driver, "init_device", self.state)?;
        self.pool
            .init(driver, self.config.buffer_count, self.config.min_buffers)
    }

    /// Unmap every buffer; stops the stream first if needed
    pub fn uninit_device(&mut self) {
        if let Err(e) = self.stop_capture() {
            log::warn!("Failed to stop streaming: {}", e);
        }

        match self.driver.as_mut() {
            Some(driver) => self.pool.uninit(driver),
            None => self.pool.unmap_all(),
        }
    }

    /// Turn streaming on; no-op while already streaming
    pub fn start_capture(&mut self) -> Result<()> {
        match self.state {
            SessionState::Streaming => return Ok(()),
            SessionState::FormatNegotiated | SessionState::Stopped if self.pool.is_initialized() => {}
            state => return Err(CaptureError::invalid_state("start_capture", state)),
        }

        let driver = require_driver(&mut self.driver, "start_capture", self.state)?;
        self.pool.requeue_all(driver)?;
        driver.stream_on().map_err(CaptureError::StreamControl)?;

        self.state = SessionState::Streaming;
        log::info!("Streaming started on {}", self.path.display());
        Ok(())
    }

    /// Turn streaming off; no-op unless streaming
    pub fn stop_capture(&mut self) -> Result<()> {
        if self.state != SessionState::Streaming {
            return Ok(());
        }

        let driver = require_driver(&mut self.driver, "stop_capture", self.state)?;
        let result = driver.stream_off().map_err(CaptureError::StreamControl);

        // Stream-off drops the driver's queue, every buffer is ours again
        self.pool.reclaim_all();
        self.state = SessionState::Stopped;
        log::info!("Streaming stopped on {}", self.path.display());
        result
    }

    /// Dequeue one buffer, decode it to RGB888 and requeue it
    ///
    /// Blocks until the driver has a filled buffer. A buffer that fails to
    /// decode yields a zero-filled frame; a failed requeue is logged and the
    /// decoded frame is still returned.
    pub fn capture_frame(&mut self) -> Result<DecodedFrame> {
        let format = match (self.state, self.format) {
            (SessionState::Streaming, Some(format)) => format,
            (state, _) => return Err(CaptureError::invalid_state("capture_frame", state)),
        };

        let driver = require_driver(&mut self.driver, "capture_frame", self.state)?;
        let buffer = self.pool.dequeue(driver)?;

        let frame = match self.pool.bytes(buffer.index) {
            Some(raw) => decode_buffer(&format, raw, buffer.bytes_used as usize),
            None => DecodedFrame::blank(format.width, format.height),
        };

        if let Err(e) = self.pool.requeue(driver, buffer.index) {
            log::warn!("Failed to requeue buffer: {}", e);
        }

        Ok(frame)
    }

    /// Every (encoding, frame size) pair the open device advertises
    pub fn media_types(&mut self) -> Vec<MediaTypeDescriptor> {
        match self.driver.as_mut() {
            Some(driver) => enumerate_media_types(driver),
            None => {
                log::warn!("Device not opened");
                Vec::new()
            }
        }
    }

    /// Stop streaming, unmap buffers and close the device
    ///
    /// Safe to call any number of times from any state.
    pub fn release(&mut self) {
        self.uninit_device();

        if self.driver.take().is_some() {
            log::info!("Closed {}", self.path.display());
        }
        self.format = None;
        self.capabilities = None;
        self.state = SessionState::Closed;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn format(&self) -> Option<NegotiatedFormat> {
        self.format
    }

    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.driver.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn buffer_ownership(&self, index: u32) -> Option<Ownership> {
        self.pool.ownership(index)
    }
}

impl<D: CaptureDriver> Drop for DeviceSession<D> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Retry once with MJPEG at the resolution the driver just granted
fn fallback_to_compressed<D: CaptureDriver>(
    driver: &mut D,
    rejected: NegotiatedFormat,
) -> NegotiatedFormat {
    let request = PixFormat::new(rejected.width, rejected.height, FOURCC_MJPEG);

    match driver.set_format(request) {
        Ok(granted) => {
            let format = NegotiatedFormat::from(granted);
            if format.encoding == PixelEncoding::Unknown {
                log::warn!(
                    "Unknown pixel format {}, frames may appear corrupted",
                    fourcc_to_string(format.fourcc)
                );
            } else {
                log::info!(
                    "Negotiated format: {} (fallback) {}x{}",
                    format.encoding,
                    format.width,
                    format.height
                );
            }
            format
        }
        Err(e) => {
            log::warn!(
                "Unknown pixel format {}, frames may appear corrupted ({})",
                fourcc_to_string(rejected.fourcc),
                e
            );
            rejected
        }
    }
}

/// Decode one raw driver buffer into a frame of the negotiated size
///
/// `raw` is the whole mapped buffer, `bytes_used` what the driver reported
/// filling (0 means unknown). The result is always exactly
/// `width * height * 3` bytes.
pub fn decode_buffer(format: &NegotiatedFormat, raw: &[u8], bytes_used: usize) -> DecodedFrame {
    let (width, height) = (format.width as usize, format.height as usize);
    let mut frame = DecodedFrame::blank(format.width, format.height);

    let used = if bytes_used == 0 {
        raw.len()
    } else {
        bytes_used.min(raw.len())
    };
    let payload = &raw[..used];

    // The SOI signature overrides a packed negotiation: some devices
    // deliver JPEG data regardless of the format they granted
    if format.encoding == PixelEncoding::CompressedJpeg || is_jpeg(payload) {
        if let Err(e) = decode_jpeg_to_rgb888(payload, frame.data_mut(), width, height) {
            log::warn!("MJPEG decode failed, blank frame: {}", e);
            frame.data_mut().fill(0);
        }
    } else {
        if let Some(expected) = format.encoding.raw_frame_size(format.width, format.height) {
            if raw.len() < expected {
                log::debug!("Short packed buffer: {} of {} bytes", raw.len(), expected);
            }
        }
        yuyv_to_rgb888(raw, frame.data_mut(), width, height);
    }

    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DriverEvent, MockDriver};
    use litecam_video::write_jpeg;

    const UNKNOWN_FOURCC: u32 = litecam_video::fourcc(b"NV12");

    fn session() -> DeviceSession<MockDriver> {
        DeviceSession::new(CaptureConfig::default())
    }

    fn streaming_session(driver: MockDriver, width: u32, height: u32) -> DeviceSession<MockDriver> {
        let mut session = session();
        session.open_with(driver, "/dev/mock0").unwrap();
        session.negotiate(width, height).unwrap();
        session.init_device().unwrap();
        session.start_capture().unwrap();
        session
    }

    fn packed_gray(width: u32, height: u32, luma: u8) -> Vec<u8> {
        // u = v = 128 carries no chroma, so every channel equals luma
        (0..width * height).flat_map(|_| [luma, 128]).collect()
    }

    fn jpeg_payload(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        let raster: Vec<u8> = (0..width * height).flat_map(|_| rgb).collect();
        let mut encoded = Vec::new();
        write_jpeg(&raster, width, height, 90, &mut encoded).unwrap();
        encoded
    }

    #[test]
    fn test_open_rejects_non_capture_device() {
        let driver = MockDriver::new();
        driver.state().caps.capabilities = 0;
        let mut session = session();

        let result = session.open_with(driver.clone(), "/dev/mock0");

        assert!(matches!(result, Err(CaptureError::DeviceUnavailable { .. })));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_open());
    }

    #[test]
    fn test_open_rejects_failed_capability_query() {
        let driver = MockDriver::new();
        driver.state().fail_query_caps = true;
        let mut session = session();

        assert!(session.open_with(driver, "/dev/mock0").is_err());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_second_open_is_rejected() {
        let mut session = session();
        session.open_with(MockDriver::new(), "/dev/mock0").unwrap();

        let result = session.open_with(MockDriver::new(), "/dev/mock1");

        assert!(matches!(result, Err(CaptureError::InvalidState { .. })));
        assert_eq!(session.path(), Path::new("/dev/mock0"));
    }

    #[test]
    fn test_negotiation_adopts_granted_values() {
        for &(req_w, req_h) in &[(640u32, 480u32), (1920, 1080), (123, 77), (1, 1)] {
            let driver = MockDriver::new();
            driver.state().responder = Box::new(|request: PixFormat| -> std::io::Result<PixFormat> {
                Ok(PixFormat::new(request.width / 2 + 2, request.height / 2 + 2, FOURCC_YUYV))
            });
            let mut session = session();
            session.open_with(driver, "/dev/mock0").unwrap();

            let format = session.negotiate(req_w, req_h).unwrap();

            assert_eq!(format.width, req_w / 2 + 2);
            assert_eq!(format.height, req_h / 2 + 2);
            assert_eq!(format.encoding, PixelEncoding::PackedYuv422);
            assert_eq!(session.format(), Some(format));
            assert_eq!(session.state(), SessionState::FormatNegotiated);
        }
    }

    #[test]
    fn test_negotiation_accepts_substituted_mjpeg() {
        let driver = MockDriver::granting(PixFormat::new(1280, 720, FOURCC_MJPEG));
        let mut session = session();
        session.open_with(driver.clone(), "/dev/mock0").unwrap();

        let format = session.negotiate(640, 480).unwrap();

        assert_eq!(format.encoding, PixelEncoding::CompressedJpeg);
        assert_eq!((format.width, format.height), (1280, 720));
        let set_formats = driver
            .events()
            .into_iter()
            .filter(|e| matches!(e, DriverEvent::SetFormat(_)))
            .count();
        assert_eq!(set_formats, 1, "No fallback needed for a known encoding");
    }

    #[test]
    fn test_unknown_encoding_falls_back_to_mjpeg_at_granted_size() {
        let driver = MockDriver::new();
        driver.state().responder = Box::new(|request: PixFormat| -> std::io::Result<PixFormat> {
            if request.fourcc == FOURCC_MJPEG {
                Ok(request)
            } else {
                Ok(PixFormat::new(800, 600, UNKNOWN_FOURCC))
            }
        });
        let mut session = session();
        session.open_with(driver.clone(), "/dev/mock0").unwrap();

        let format = session.negotiate(640, 480).unwrap();

        assert_eq!(format.encoding, PixelEncoding::CompressedJpeg);
        assert_eq!((format.width, format.height), (800, 600));
        let requests: Vec<PixFormat> = driver
            .events()
            .into_iter()
            .filter_map(|e| match e {
                DriverEvent::SetFormat(request) => Some(request),
                _ => None,
            })
            .collect();
        assert_eq!(
            requests,
            vec![
                PixFormat::new(640, 480, FOURCC_YUYV),
                PixFormat::new(800, 600, FOURCC_MJPEG)
            ]
        );
    }

    #[test]
    fn test_failed_fallback_is_tolerated() {
        let driver = MockDriver::new();
        driver.state().responder = Box::new(|request: PixFormat| -> std::io::Result<PixFormat> {
            if request.fourcc == FOURCC_MJPEG {
                Err(std::io::Error::from_raw_os_error(libc::EINVAL))
            } else {
                Ok(PixFormat::new(request.width, request.height, UNKNOWN_FOURCC))
            }
        });
        let mut session = session();
        session.open_with(driver, "/dev/mock0").unwrap();

        let format = session.negotiate(320, 240).unwrap();

        assert_eq!(format.encoding, PixelEncoding::Unknown);
        assert_eq!(format.fourcc, UNKNOWN_FOURCC);
        assert_eq!(session.state(), SessionState::FormatNegotiated);
    }

    #[test]
    fn test_fatal_negotiation_closes_session() {
        let driver = MockDriver::new();
        driver.state().responder = Box::new(|_: PixFormat| -> std::io::Result<PixFormat> {
            Err(std::io::Error::from_raw_os_error(libc::ENODEV))
        });
        let mut session = session();
        session.open_with(driver, "/dev/mock0").unwrap();

        let result = session.negotiate(640, 480);

        assert!(matches!(result, Err(CaptureError::FormatNegotiation(_))));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_open());
    }

    #[test]
    fn test_failed_init_allows_renegotiation() {
        let driver = MockDriver::new();
        driver.state().fail_map_at = Some(0);
        let mut session = session();
        session.open_with(driver.clone(), "/dev/mock0").unwrap();
        session.negotiate(64, 48).unwrap();

        let result = session.init_device();
        assert!(matches!(result, Err(CaptureError::BufferMap { index: 0, .. })));
        driver.state().fail_map_at = None;

        let format = session.negotiate(32, 24).unwrap();
        assert_eq!((format.width, format.height), (32, 24));
        assert_eq!(session.state(), SessionState::FormatNegotiated);

        session.init_device().unwrap();
        session.start_capture().unwrap();
        assert_eq!(session.capture_frame().unwrap().byte_size(), 32 * 24 * 3);
    }

    #[test]
    fn test_set_resolution_keeps_fourcc_and_reads_back() {
        let driver = MockDriver::new();
        driver.state().responder = Box::new(|request: PixFormat| -> std::io::Result<PixFormat> {
            Ok(PixFormat::new(request.width.min(1280), request.height.min(720), request.fourcc))
        });
        let mut session = streaming_session(driver.clone(), 640, 480);
        session.stop_capture().unwrap();

        let format = session.set_resolution(1920, 1080).unwrap();

        assert_eq!((format.width, format.height), (1280, 720));
        assert_eq!(format.encoding, PixelEncoding::PackedYuv422);
        assert_eq!(
            driver.events().last(),
            Some(&DriverEvent::SetFormat(PixFormat::new(1920, 1080, FOURCC_YUYV)))
        );
        assert_eq!(driver.live_mappings(), 0, "Old pool must be gone before renegotiating");
    }

    #[test]
    fn test_set_resolution_rejected_while_streaming() {
        let mut session = streaming_session(MockDriver::new(), 64, 48);

        let result = session.set_resolution(32, 24);

        assert!(matches!(result, Err(CaptureError::InvalidState { .. })));
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(session.format().map(|f| f.width), Some(64));
    }

    #[test]
    fn test_capture_packed_frame() {
        let driver = MockDriver::new().with_payload(packed_gray(4, 2, 200));
        let mut session = streaming_session(driver, 4, 2);

        let frame = session.capture_frame().unwrap();

        assert_eq!(frame.byte_size(), 4 * 2 * 3);
        assert!(frame.data().iter().all(|&b| b == 200));
    }

    #[test]
    fn test_ownership_alternates_per_slot() {
        let driver = MockDriver::new();
        let mut session = streaming_session(driver.clone(), 8, 4);

        for _ in 0..10 {
            session.capture_frame().unwrap();
            let stats = session.pool_stats();
            assert_eq!(stats.hardware, 4, "Every buffer is back with the driver after a capture");
        }

        let events = driver.events();
        for index in 0..4u32 {
            let sequence: Vec<Ownership> = events
                .iter()
                .filter_map(|e| match *e {
                    DriverEvent::Queue(i) if i == index => Some(Ownership::Hardware),
                    DriverEvent::Dequeue(i) if i == index => Some(Ownership::Software),
                    _ => None,
                })
                .collect();

            assert_eq!(sequence.first(), Some(&Ownership::Hardware));
            assert!(sequence.len() >= 3, "Slot {} was not cycled: {:?}", index, sequence);
            for pair in sequence.windows(2) {
                assert_ne!(pair[0], pair[1], "Slot {} repeated {:?}", index, pair[0]);
            }
        }
    }

    #[test]
    fn test_output_size_ignores_stream_dimensions() {
        let driver = MockDriver::granting(PixFormat::new(16, 8, FOURCC_MJPEG))
            .with_payload(jpeg_payload(64, 64, [0, 0, 255]));
        let mut session = streaming_session(driver, 16, 8);

        let frame = session.capture_frame().unwrap();

        assert_eq!(frame.byte_size(), 16 * 8 * 3);
        assert_eq!((frame.width, frame.height), (16, 8));
        let px = frame.pixel(15, 7).unwrap();
        assert!(px[2] > 200 && px[0] < 40, "Expected blue, got {:?}", px);
    }

    #[test]
    fn test_corrupt_jpeg_yields_blank_frame() {
        let mut corrupt = vec![0xFF, 0xD8];
        corrupt.extend((0..200u32).map(|i| (i * 37 % 251) as u8));
        let driver = MockDriver::granting(PixFormat::new(32, 16, FOURCC_MJPEG)).with_payload(corrupt);
        let mut session = streaming_session(driver, 32, 16);

        let frame = session.capture_frame().unwrap();

        assert_eq!(frame.byte_size(), 32 * 16 * 3);
        assert!(frame.data().iter().all(|&b| b == 0));
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(session.pool_stats().hardware, 4, "Buffer requeued despite decode failure");
    }

    #[test]
    fn test_jpeg_signature_overrides_packed_negotiation() {
        let driver = MockDriver::new().with_payload(jpeg_payload(16, 16, [255, 0, 0]));
        let mut session = streaming_session(driver, 16, 16);
        assert_eq!(session.format().unwrap().encoding, PixelEncoding::PackedYuv422);

        let frame = session.capture_frame().unwrap();

        let px = frame.pixel(8, 8).unwrap();
        assert!(px[0] > 200 && px[1] < 60 && px[2] < 60, "Expected red, got {:?}", px);
    }

    #[test]
    fn test_unknown_encoding_decodes_as_packed() {
        let driver = MockDriver::granting(PixFormat::new(2, 1, UNKNOWN_FOURCC))
            .with_payload(vec![255, 128, 0, 128]);
        let mut session = streaming_session(driver, 2, 1);

        let frame = session.capture_frame().unwrap();

        assert_eq!(frame.data(), &[255, 255, 255, 0, 0, 0]);
    }

    #[test]
    fn test_dequeue_failure_is_reported() {
        let driver = MockDriver::new();
        let mut session = streaming_session(driver.clone(), 8, 4);
        driver.state().fail_dequeue = true;

        let result = session.capture_frame();

        assert!(matches!(result, Err(CaptureError::Dequeue(_))));
        assert_eq!(session.state(), SessionState::Streaming);
    }

    #[test]
    fn test_requeue_failure_keeps_frame() {
        let driver = MockDriver::new().with_payload(packed_gray(8, 4, 90));
        let mut session = streaming_session(driver.clone(), 8, 4);
        driver.state().fail_queue = true;

        let frame = session.capture_frame().unwrap();

        assert_eq!(frame.byte_size(), 8 * 4 * 3);
        assert!(frame.data().iter().all(|&b| b == 90));
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(session.pool_stats().software, 1);
    }

    #[test]
    fn test_capture_requires_streaming() {
        let mut session = session();
        assert!(matches!(
            session.capture_frame(),
            Err(CaptureError::InvalidState { state: SessionState::Closed, .. })
        ));

        session.open_with(MockDriver::new(), "/dev/mock0").unwrap();
        session.negotiate(8, 4).unwrap();
        session.init_device().unwrap();
        assert!(session.capture_frame().is_err());
    }

    #[test]
    fn test_start_requires_buffers() {
        let mut session = session();
        session.open_with(MockDriver::new(), "/dev/mock0").unwrap();
        session.negotiate(8, 4).unwrap();

        assert!(matches!(
            session.start_capture(),
            Err(CaptureError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_stop_and_restart_requeues_buffers() {
        let driver = MockDriver::new();
        let mut session = streaming_session(driver.clone(), 8, 4);

        session.stop_capture().unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.pool_stats().software, 4);

        session.start_capture().unwrap();
        assert_eq!(session.pool_stats().hardware, 4);
        assert_eq!(driver.state().queued.len(), 4);
        session.capture_frame().unwrap();
    }

    #[test]
    fn test_stop_and_start_are_idempotent() {
        let driver = MockDriver::new();
        let mut session = session();
        session.stop_capture().unwrap();

        session.open_with(driver.clone(), "/dev/mock0").unwrap();
        session.stop_capture().unwrap();
        session.negotiate(8, 4).unwrap();
        session.init_device().unwrap();
        session.start_capture().unwrap();
        session.start_capture().unwrap();

        let stream_ons = driver
            .events()
            .into_iter()
            .filter(|e| *e == DriverEvent::StreamOn)
            .count();
        assert_eq!(stream_ons, 1);
        assert!(!driver.events().contains(&DriverEvent::StreamOff));
    }

    #[test]
    fn test_release_twice_from_streaming() {
        let driver = MockDriver::new();
        let mut session = streaming_session(driver.clone(), 8, 4);

        session.release();
        session.release();

        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_open());
        assert_eq!(session.format(), None);
        assert_eq!(driver.live_mappings(), 0);
        assert_eq!(driver.state().allocated, 0);
        assert!(!driver.state().streaming);
    }

    #[test]
    fn test_release_on_fresh_session() {
        let mut session = session();
        session.release();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_drop_releases_resources() {
        let driver = MockDriver::new();
        {
            let _session = streaming_session(driver.clone(), 8, 4);
            assert_eq!(driver.live_mappings(), 4);
        }
        assert_eq!(driver.live_mappings(), 0);
        assert!(!driver.state().streaming);
    }

    #[test]
    fn test_decode_buffer_short_packed_input() {
        let format = NegotiatedFormat::from(PixFormat::new(4, 2, FOURCC_YUYV));

        let frame = decode_buffer(&format, &[128u8; 4], 4);

        assert_eq!(frame.byte_size(), 24);
        assert_eq!(&frame.data()[..6], &[128; 6]);
        assert!(frame.data()[6..].iter().all(|&b| b == 0));
    }
}
