//! Compressed-image (JPEG/MJPEG) decoding into RGB888
//!
//! The decoder runs entirely inside `decode_jpeg_to_rgb888`: decoder state
//! is created, used and dropped within the call on every exit path, and a
//! panic raised inside the codec is caught and reported as
//! [`DecodeError::Aborted`]. The caller's output buffer is only written
//! after a complete decode, so a failed call leaves it unchanged.

use crate::types::RGB_BYTES_PER_PIXEL;
use image::codecs::jpeg::JpegDecoder;
use image::{DynamicImage, ImageDecoder, ImageError};
use std::io::Cursor;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;

/// JPEG start-of-image marker
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("compressed buffer is empty")]
    Empty,

    #[error("buffer does not start with a JPEG SOI marker")]
    NotJpeg,

    #[error("JPEG decoder error: {0}")]
    Decoder(#[from] ImageError),

    #[error("JPEG decoder aborted")]
    Aborted,
}

/// How much of the output raster a successful decode filled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeExtent {
    /// Dimensions declared by the compressed stream
    pub source_width: u32,
    pub source_height: u32,
    /// Rows and columns copied into the output buffer
    pub rows_written: u32,
    pub columns_written: u32,
}

/// Check for the JPEG start-of-image signature
pub fn is_jpeg(data: &[u8]) -> bool {
    data.len() >= JPEG_SOI.len() && data[..2] == JPEG_SOI
}

fn decode_to_rgb(data: &[u8]) -> Result<(u32, u32, Vec<u8>), DecodeError> {
    let decoder = JpegDecoder::new(Cursor::new(data))?;
    let (width, height) = decoder.dimensions();

    // Grayscale and CMYK streams come back as RGB as well
    let rgb = DynamicImage::from_decoder(decoder)?.into_rgb8();

    Ok((width, height, rgb.into_raw()))
}

/// Decode a JPEG buffer into a caller-supplied RGB888 raster
///
/// `output` is `width * height * 3` bytes. When the stream declares a larger
/// image than the output, decoding stops at the output's last row and
/// column; a smaller image leaves the remaining output bytes untouched.
pub fn decode_jpeg_to_rgb888(
    data: &[u8],
    output: &mut [u8],
    width: usize,
    height: usize,
) -> Result<DecodeExtent, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::Empty);
    }
    if !is_jpeg(data) {
        return Err(DecodeError::NotJpeg);
    }

    let (src_width, src_height, rgb) = panic::catch_unwind(AssertUnwindSafe(|| decode_to_rgb(data)))
        .map_err(|_| DecodeError::Aborted)??;

    let out_stride = width * RGB_BYTES_PER_PIXEL;
    let src_stride = src_width as usize * RGB_BYTES_PER_PIXEL;
    let columns = width.min(src_width as usize);
    let row_bytes = columns * RGB_BYTES_PER_PIXEL;

    // Output capacity is the hard limit, not the stream's own dimensions
    let capacity_rows = if out_stride == 0 { 0 } else { output.len() / out_stride };
    let rows = height.min(src_height as usize).min(capacity_rows);

    for row in 0..rows {
        let src = &rgb[row * src_stride..row * src_stride + row_bytes];
        output[row * out_stride..row * out_stride + row_bytes].copy_from_slice(src);
    }

    Ok(DecodeExtent {
        source_width: src_width,
        source_height: src_height,
        rows_written: rows as u32,
        columns_written: columns as u32,
    })
}
