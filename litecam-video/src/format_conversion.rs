//! Packed YUV 4:2:2 to RGB888 conversion (BT.601, full range)
//!
//! Every 4-byte group `Y0 U Y1 V` carries two pixels sharing one chroma
//! pair and expands to 6 output bytes:
//!
//! ```text
//! R = Y + 1.402   * (V - 128)
//! G = Y - 0.34414 * (U - 128) - 0.71414 * (V - 128)
//! B = Y + 1.772   * (U - 128)
//! ```
//!
//! Channels are clamped to [0, 255] and truncated to the stored integer.

use rayon::prelude::*;

const BYTES_PER_GROUP: usize = 4;
const RGB_PER_GROUP: usize = 6;

/// Frames with at least this many rows are converted row-parallel
const PARALLEL_MIN_ROWS: usize = 64;

#[inline(always)]
fn clamp_channel(value: f32) -> u8 {
    value.clamp(0.0, 255.0) as u8
}

/// Convert a single YUV sample to RGB
#[inline(always)]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;

    [
        clamp_channel(y + 1.402 * v),
        clamp_channel(y - 0.34414 * u - 0.71414 * v),
        clamp_channel(y + 1.772 * u),
    ]
}

#[inline(always)]
fn convert_group(group: &[u8], out: &mut [u8]) {
    let (y0, u, y1, v) = (group[0], group[1], group[2], group[3]);
    out[..3].copy_from_slice(&yuv_to_rgb(y0, u, v));
    out[3..].copy_from_slice(&yuv_to_rgb(y1, u, v));
}

/// Scalar conversion over whole groups
///
/// Converts as many complete groups as both buffers hold; never writes
/// past `output` and never reads past `input`.
pub fn yuyv_to_rgb888_scalar(input: &[u8], output: &mut [u8]) {
    for (group, out) in input
        .chunks_exact(BYTES_PER_GROUP)
        .zip(output.chunks_exact_mut(RGB_PER_GROUP))
    {
        convert_group(group, out);
    }
}

/// Row-parallel conversion using rayon
///
/// Produces byte-identical output to the scalar path. Width must be even
/// so that rows start on a group boundary.
pub fn yuyv_to_rgb888_parallel(input: &[u8], output: &mut [u8], width: usize, height: usize) {
    debug_assert!(width % 2 == 0, "Width must be even for row-parallel conversion");

    let in_stride = width * 2;
    let out_stride = width * 3;
    if in_stride == 0 {
        return;
    }

    let rows = height
        .min(input.len() / in_stride)
        .min(output.len() / out_stride);

    input[..rows * in_stride]
        .par_chunks_exact(in_stride)
        .zip(output[..rows * out_stride].par_chunks_exact_mut(out_stride))
        .for_each(|(row_in, row_out)| yuyv_to_rgb888_scalar(row_in, row_out));
}

/// Convert a packed 4:2:2 frame into a caller-supplied RGB888 buffer
///
/// `input` is expected to hold `width * height * 2` bytes and `output`
/// `width * height * 3` bytes. Shorter buffers are not an error: only the
/// groups both buffers can hold are written.
pub fn yuyv_to_rgb888(input: &[u8], output: &mut [u8], width: usize, height: usize) {
    let packed_len = (width * height * 2).min(input.len());
    let input = &input[..packed_len];

    if height >= PARALLEL_MIN_ROWS && width % 2 == 0 {
        yuyv_to_rgb888_parallel(input, output, width, height);
        return;
    }

    yuyv_to_rgb888_scalar(input, output);
}
