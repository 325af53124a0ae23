//! Pixel encodings and decoded frame types

use std::fmt;

/// Bytes per pixel of the RGB888 output raster
pub const RGB_BYTES_PER_PIXEL: usize = 3;

/// Build a little-endian fourcc code from its four characters
pub const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | ((code[1] as u32) << 8) | ((code[2] as u32) << 16) | ((code[3] as u32) << 24)
}

/// Packed YUV 4:2:2 (Y0 U Y1 V)
pub const FOURCC_YUYV: u32 = fourcc(b"YUYV");
/// Motion JPEG
pub const FOURCC_MJPEG: u32 = fourcc(b"MJPG");

/// Render a fourcc as its four characters, `0x...` when not printable
pub fn fourcc_to_string(code: u32) -> String {
    let bytes = code.to_le_bytes();
    if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        bytes.iter().map(|&b| b as char).collect()
    } else {
        format!("{:#010x}", code)
    }
}

/// On-wire pixel encoding negotiated with a capture device
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelEncoding {
    #[default]
    Unknown = 0,
    PackedYuv422 = 1,   // YUYV, two luma samples per chroma pair
    CompressedJpeg = 2, // MJPEG, one JPEG image per buffer
}

impl PixelEncoding {
    /// Classify a fourcc granted by the driver
    pub fn from_fourcc(code: u32) -> Self {
        match code {
            FOURCC_YUYV => PixelEncoding::PackedYuv422,
            FOURCC_MJPEG => PixelEncoding::CompressedJpeg,
            _ => PixelEncoding::Unknown,
        }
    }

    /// Short label used in log output
    pub fn label(self) -> &'static str {
        match self {
            PixelEncoding::PackedYuv422 => "YUYV",
            PixelEncoding::CompressedJpeg => "MJPEG",
            PixelEncoding::Unknown => "unknown",
        }
    }

    /// Raw buffer size for one frame, when the encoding has a fixed size
    pub fn raw_frame_size(self, width: u32, height: u32) -> Option<usize> {
        match self {
            PixelEncoding::PackedYuv422 => Some(width as usize * height as usize * 2),
            _ => None,
        }
    }
}

impl fmt::Display for PixelEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// RGB888 frame owned by the caller
///
/// An empty frame (no pixel data, zero size) is the sentinel for a failed
/// acquisition. Frames are never shared with the session that produced them.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    data: Vec<u8>,
}

impl DecodedFrame {
    /// Zero-filled frame sized `width * height * 3`
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; Self::byte_size_for(width, height)],
        }
    }

    /// Sentinel returned when no frame could be acquired
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wrap an existing RGB888 raster
    ///
    /// Returns `None` if the buffer length does not match the dimensions.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != Self::byte_size_for(width, height) {
            return None;
        }
        Some(Self { width, height, data })
    }

    /// Byte size of an RGB888 raster with the given dimensions
    pub fn byte_size_for(width: u32, height: u32) -> usize {
        width as usize * height as usize * RGB_BYTES_PER_PIXEL
    }

    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// RGB triple at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * RGB_BYTES_PER_PIXEL;
        let px = self.data.get(offset..offset + RGB_BYTES_PER_PIXEL)?;
        Some([px[0], px[1], px[2]])
    }

    /// Free the pixel buffer, leaving the empty sentinel behind
    pub fn release(&mut self) {
        self.data = Vec::new();
        self.width = 0;
        self.height = 0;
    }
}

impl fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("byte_size", &self.byte_size())
            .finish()
    }
}
