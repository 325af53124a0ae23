//! Capture driver boundary
//!
//! Every call that configures the driver is a negotiation: `set_format` and
//! `request_buffers` return what the driver actually granted, which may differ
//! from the request. Callers must adopt the granted values.

use std::io;
use std::ops::Deref;

/// Device supports single-planar video capture
pub const CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;
/// Device supports streaming I/O
pub const CAP_STREAMING: u32 = 0x0400_0000;
/// `device_caps` is filled in
pub const CAP_DEVICE_CAPS: u32 = 0x8000_0000;

/// Capability report of an open device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub driver: String,
    pub card: String,
    pub bus_info: String,
    /// Capabilities of the whole physical device
    pub capabilities: u32,
    /// Capabilities of this device node
    pub device_caps: u32,
}

impl Capabilities {
    /// Capabilities of the opened node, falling back to the physical device's
    pub fn node_caps(&self) -> u32 {
        if self.capabilities & CAP_DEVICE_CAPS != 0 {
            self.device_caps
        } else {
            self.capabilities
        }
    }

    pub fn supports_capture(&self) -> bool {
        self.node_caps() & CAP_VIDEO_CAPTURE != 0
    }
}

/// Pixel format as requested from or granted by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixFormat {
    pub width: u32,
    pub height: u32,
    pub fourcc: u32,
}

impl PixFormat {
    pub fn new(width: u32, height: u32, fourcc: u32) -> Self {
        Self { width, height, fourcc }
    }
}

/// Location of a driver buffer, as reported by a buffer query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub index: u32,
    pub length: u32,
    /// Offset to pass to the mapping call
    pub offset: u32,
}

/// A buffer handed back by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    pub index: u32,
    pub bytes_used: u32,
}

/// One pixel format advertised by the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescription {
    pub fourcc: u32,
    pub description: String,
}

/// Frame sizes supported for a pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSize {
    Discrete {
        width: u32,
        height: u32,
    },
    Stepwise {
        min_width: u32,
        min_height: u32,
        max_width: u32,
        max_height: u32,
        step_width: u32,
        step_height: u32,
    },
}

impl FrameSize {
    /// Discrete size, or the smallest size of a stepwise range
    pub fn smallest(&self) -> (u32, u32) {
        match *self {
            FrameSize::Discrete { width, height } => (width, height),
            FrameSize::Stepwise {
                min_width,
                min_height,
                ..
            } => (min_width, min_height),
        }
    }
}

/// Kernel capture driver operations used by a session
///
/// Implemented by [`crate::v4l2::V4l2Device`] for real hardware.
pub trait CaptureDriver {
    /// Process-side view of a mapped driver buffer; dropping it unmaps
    type Mapping: Deref<Target = [u8]>;

    fn query_capabilities(&mut self) -> io::Result<Capabilities>;

    /// Request a format; returns the format the driver granted
    fn set_format(&mut self, request: PixFormat) -> io::Result<PixFormat>;

    /// Request `count` buffers; returns the granted count. `0` frees them.
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferInfo>;

    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<Self::Mapping>;

    /// Hand a buffer to the driver
    fn queue_buffer(&mut self, index: u32) -> io::Result<()>;

    /// Take a filled buffer back, blocking until one is ready
    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer>;

    fn stream_on(&mut self) -> io::Result<()>;

    fn stream_off(&mut self) -> io::Result<()>;

    fn enum_formats(&mut self) -> io::Result<Vec<FormatDescription>>;

    fn enum_frame_sizes(&mut self, fourcc: u32) -> io::Result<Vec<FrameSize>>;
}
