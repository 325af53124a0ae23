//! Capture configuration

use std::path::PathBuf;

/// Session and discovery settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Initial resolution requested during negotiation
    pub width: u32,
    pub height: u32,
    /// Buffers requested from the driver
    pub buffer_count: u32,
    /// Fewer granted buffers than this fails pool initialization
    pub min_buffers: u32,
    /// Device nodes are `<prefix><index>`
    pub device_prefix: PathBuf,
    /// Discovery scans indices `0..scan_limit`
    pub scan_limit: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            buffer_count: 4,
            min_buffers: 2,
            device_prefix: PathBuf::from("/dev/video"),
            scan_limit: 10,
        }
    }
}

impl CaptureConfig {
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_scan_limit(mut self, scan_limit: u32) -> Self {
        self.scan_limit = scan_limit;
        self
    }

    /// Device node path for a device index
    pub fn device_path(&self, index: u32) -> PathBuf {
        let mut path = self.device_prefix.clone().into_os_string();
        path.push(index.to_string());
        PathBuf::from(path)
    }
}
