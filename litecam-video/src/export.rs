//! JPEG export of decoded frames

use crate::types::DecodedFrame;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageError};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Quality used when saving captured frames
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("frame is empty or its buffer does not match {width}x{height}")]
    InvalidFrame { width: u32, height: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JPEG encoder error: {0}")]
    Encoder(#[from] ImageError),
}

/// Encode an RGB888 raster as JPEG into any writer
pub fn write_jpeg<W: Write>(
    rgb: &[u8],
    width: u32,
    height: u32,
    quality: u8,
    writer: W,
) -> Result<(), ExportError> {
    if width == 0 || height == 0 || rgb.len() != DecodedFrame::byte_size_for(width, height) {
        return Err(ExportError::InvalidFrame { width, height });
    }

    let encoder = JpegEncoder::new_with_quality(writer, quality.clamp(1, 100));
    encoder.write_image(rgb, width, height, ExtendedColorType::Rgb8)?;
    Ok(())
}

/// Save a frame to `path` at the default quality
pub fn save_frame_as_jpeg(frame: &DecodedFrame, path: impl AsRef<Path>) -> Result<(), ExportError> {
    save_rgb_as_jpeg(frame.data(), frame.width, frame.height, path)
}

/// Save a borrowed RGB888 raster to `path` at the default quality
///
/// Nothing is created on disk when the raster does not match the dimensions.
pub fn save_rgb_as_jpeg(
    rgb: &[u8],
    width: u32,
    height: u32,
    path: impl AsRef<Path>,
) -> Result<(), ExportError> {
    let path = path.as_ref();
    if rgb.is_empty() || rgb.len() != DecodedFrame::byte_size_for(width, height) {
        return Err(ExportError::InvalidFrame { width, height });
    }

    let mut writer = BufWriter::new(File::create(path)?);

    write_jpeg(rgb, width, height, DEFAULT_JPEG_QUALITY, &mut writer)?;
    writer.flush()?;

    log::info!("Saved frame to {}", path.display());
    Ok(())
}
