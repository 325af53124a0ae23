//! Device and media type enumeration

use crate::config::CaptureConfig;
use crate::driver::{Capabilities, CaptureDriver};
use crate::v4l2::V4l2Device;
use litecam_video::fourcc_to_string;
use std::io;
use std::path::{Path, PathBuf};

/// A capture-capable device node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub index: u32,
    pub path: PathBuf,
    /// Card name reported by the driver
    pub name: String,
}

/// One (encoding, frame size) combination a device advertises
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTypeDescriptor {
    pub width: u32,
    pub height: u32,
    /// Driver's format description, or the fourcc when it reports none
    pub label: String,
    pub fourcc: u32,
}

/// Scan the first `scan_limit` device nodes for capture devices
pub fn list_capture_devices(config: &CaptureConfig) -> Vec<DeviceDescriptor> {
    discover(config, |path| {
        let mut device = V4l2Device::open(path)?;
        device.query_capabilities()
    })
}

/// Query each candidate path with `query`, keeping capture-capable nodes
///
/// Descriptors come back in index order. Missing or unreadable nodes are
/// skipped.
pub fn discover<F>(config: &CaptureConfig, mut query: F) -> Vec<DeviceDescriptor>
where
    F: FnMut(&Path) -> io::Result<Capabilities>,
{
    let mut devices = Vec::new();

    for index in 0..config.scan_limit {
        let path = config.device_path(index);
        match query(&path) {
            Ok(caps) if caps.supports_capture() => {
                log::debug!("Found capture device {}: {}", path.display(), caps.card);
                devices.push(DeviceDescriptor {
                    index,
                    path,
                    name: caps.card,
                });
            }
            Ok(_) => log::debug!("{} is not a capture device", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::debug!("Skipping {}: {}", path.display(), e),
        }
    }

    devices
}

/// Every (encoding x frame size) pair an open device reports
pub fn enumerate_media_types<D: CaptureDriver>(driver: &mut D) -> Vec<MediaTypeDescriptor> {
    let formats = match driver.enum_formats() {
        Ok(formats) => formats,
        Err(e) => {
            log::warn!("Failed to enumerate formats: {}", e);
            Vec::new()
        }
    };

    let mut media_types = Vec::new();
    for format in formats {
        let label = if format.description.trim().is_empty() {
            fourcc_to_string(format.fourcc)
        } else {
            format.description.trim().to_string()
        };

        let sizes = match driver.enum_frame_sizes(format.fourcc) {
            Ok(sizes) => sizes,
            Err(e) => {
                log::debug!("No frame sizes for {}: {}", label, e);
                continue;
            }
        };

        media_types.extend(sizes.iter().map(|size| {
            let (width, height) = size.smallest();
            MediaTypeDescriptor {
                width,
                height,
                label: label.clone(),
                fourcc: format.fourcc,
            }
        }));
    }

    if media_types.is_empty() {
        log::warn!("Device advertises no media types");
    }
    media_types
}
