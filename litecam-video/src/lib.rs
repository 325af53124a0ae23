//! LiteCam video - pixel decoding for captured frames
//!
//! Turns raw capture buffers into RGB888 rasters:
//! - Packed YUV 4:2:2 unpacking (BT.601), row-parallel for large frames
//! - JPEG/MJPEG decompression that reports failure instead of crashing
//! - JPEG export of decoded frames

pub mod export;
pub mod format_conversion;
pub mod jpeg;
pub mod types;

pub use export::*;
pub use format_conversion::*;
pub use jpeg::*;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizes() {
        assert_eq!(DecodedFrame::byte_size_for(640, 480), 921_600);
        assert_eq!(PixelEncoding::PackedYuv422.raw_frame_size(640, 480), Some(614_400));
        assert_eq!(PixelEncoding::CompressedJpeg.raw_frame_size(640, 480), None);
    }
}
