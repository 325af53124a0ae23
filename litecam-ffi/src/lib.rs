//! LiteCam FFI - C Foreign Function Interface
//!
//! Exposes the camera contract to C hosts. Frames returned by
//! `litecam_camera_capture_frame` belong to the caller until passed to
//! `litecam_release_frame`.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_uint};
use std::ptr;

use litecam_capture::{list_capture_devices, Camera, CaptureConfig};
use litecam_video::{save_rgb_as_jpeg, DecodedFrame};

/// Length of the fixed string fields, including the terminating NUL
pub const LITECAM_NAME_LEN: usize = 512;

/// Opaque handle to a Camera (C-compatible)
pub struct LiteCamera {
    _private: [u8; 0],
}

/// C-compatible RGB888 frame
///
/// `rgb_data` is null and `size` is 0 for an empty frame.
#[repr(C)]
pub struct CFrameData {
    pub width: u32,
    pub height: u32,
    pub size: usize,
    pub rgb_data: *mut u8,
}

impl CFrameData {
    fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            size: 0,
            rgb_data: ptr::null_mut(),
        }
    }

    fn from_frame(frame: DecodedFrame) -> Self {
        if frame.is_empty() {
            return Self::empty();
        }

        let (width, height) = (frame.width, frame.height);
        let data = frame.into_data().into_boxed_slice();
        let size = data.len();
        Self {
            width,
            height,
            size,
            rgb_data: Box::into_raw(data) as *mut u8,
        }
    }
}

/// C-compatible media type description
#[repr(C)]
pub struct CMediaTypeInfo {
    pub width: u32,
    pub height: u32,
    pub subtype_name: [c_char; LITECAM_NAME_LEN],
}

/// C-compatible capture device description
#[repr(C)]
pub struct CCaptureDeviceInfo {
    pub index: u32,
    pub friendly_name: [c_char; LITECAM_NAME_LEN],
}

/// Copy `src` into a fixed C string field, truncating and NUL-terminating
fn copy_c_string(dst: &mut [c_char; LITECAM_NAME_LEN], src: &str) {
    let bytes = src.as_bytes();
    let len = bytes.len().min(LITECAM_NAME_LEN - 1);
    for (d, &s) in dst.iter_mut().zip(&bytes[..len]) {
        *d = s as c_char;
    }
    dst[len..].fill(0);
}

// ============================================================================
// CAMERA API
// ============================================================================

/// Create a closed camera
///
/// # Safety
/// Safe to call. Free with `litecam_camera_destroy`.
#[no_mangle]
pub unsafe extern "C" fn litecam_camera_create() -> *mut LiteCamera {
    let camera: Box<Camera> = Box::new(Camera::with_config(CaptureConfig::default()));
    Box::into_raw(camera) as *mut LiteCamera
}

/// Destroy a camera, closing its device
///
/// # Safety
/// Caller must ensure ptr is valid and not already freed.
#[no_mangle]
pub unsafe extern "C" fn litecam_camera_destroy(ptr: *mut LiteCamera) {
    if !ptr.is_null() {
        let _ = Box::from_raw(ptr as *mut Camera);
    }
}

/// Open device `index` and start streaming; 1 on success
///
/// # Safety
/// Caller must ensure ptr is valid.
#[no_mangle]
pub unsafe extern "C" fn litecam_camera_open(ptr: *mut LiteCamera, index: c_uint) -> c_int {
    if ptr.is_null() {
        return 0;
    }

    let camera = &mut *(ptr as *mut Camera);
    camera.open(index) as c_int
}

/// Change the capture resolution; 1 on success
///
/// # Safety
/// Caller must ensure ptr is valid.
#[no_mangle]
pub unsafe extern "C" fn litecam_camera_set_resolution(
    ptr: *mut LiteCamera,
    width: u32,
    height: u32,
) -> c_int {
    if ptr.is_null() {
        return 0;
    }

    let camera = &mut *(ptr as *mut Camera);
    camera.set_resolution(width, height) as c_int
}

/// Capture one frame into `frame_out`; 1 on success
///
/// On failure `frame_out` is set to the empty frame.
///
/// # Safety
/// Caller must ensure ptr is valid. frame_out must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn litecam_camera_capture_frame(
    ptr: *mut LiteCamera,
    frame_out: *mut CFrameData,
) -> c_int {
    if frame_out.is_null() {
        return 0;
    }
    if ptr.is_null() {
        frame_out.write(CFrameData::empty());
        return 0;
    }

    let camera = &mut *(ptr as *mut Camera);
    let frame = CFrameData::from_frame(camera.capture_frame());
    let captured = !frame.rgb_data.is_null();
    frame_out.write(frame);
    captured as c_int
}

/// Stop streaming and close the device; the handle stays valid
///
/// # Safety
/// Caller must ensure ptr is valid.
#[no_mangle]
pub unsafe extern "C" fn litecam_camera_release(ptr: *mut LiteCamera) {
    if ptr.is_null() {
        return;
    }

    let camera = &mut *(ptr as *mut Camera);
    camera.release();
}

/// Write up to `capacity` media types into `out`
///
/// Returns the total number available, which may exceed `capacity`. Pass a
/// null `out` to query the count.
///
/// # Safety
/// Caller must ensure ptr is valid and out holds `capacity` entries.
#[no_mangle]
pub unsafe extern "C" fn litecam_camera_list_media_types(
    ptr: *mut LiteCamera,
    out: *mut CMediaTypeInfo,
    capacity: usize,
) -> usize {
    if ptr.is_null() {
        return 0;
    }

    let camera = &mut *(ptr as *mut Camera);
    let media_types = camera.list_supported_media_types();

    if !out.is_null() {
        let out = std::slice::from_raw_parts_mut(out, capacity);
        for (slot, media_type) in out.iter_mut().zip(&media_types) {
            slot.width = media_type.width;
            slot.height = media_type.height;
            copy_c_string(&mut slot.subtype_name, &media_type.label);
        }
    }

    media_types.len()
}

// ============================================================================
// FRAME API
// ============================================================================

/// Free a frame's pixel data and reset it to the empty frame
///
/// # Safety
/// frame must be null or point to a frame filled by this library.
#[no_mangle]
pub unsafe extern "C" fn litecam_release_frame(frame: *mut CFrameData) {
    if frame.is_null() {
        return;
    }

    let data = (*frame).rgb_data;
    if !data.is_null() {
        let slice = ptr::slice_from_raw_parts_mut(data, (*frame).size);
        let _ = Box::from_raw(slice);
    }
    frame.write(CFrameData::empty());
}

/// Save a frame as a JPEG file; 1 on success
///
/// # Safety
/// frame must point to a valid frame and path to a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn litecam_save_frame_as_jpeg(
    frame: *const CFrameData,
    path: *const c_char,
) -> c_int {
    if frame.is_null() || path.is_null() || (*frame).rgb_data.is_null() {
        return 0;
    }

    let Ok(path) = CStr::from_ptr(path).to_str() else {
        log::warn!("JPEG path is not valid UTF-8");
        return 0;
    };

    let frame = &*frame;
    let rgb = std::slice::from_raw_parts(frame.rgb_data, frame.size);
    match save_rgb_as_jpeg(rgb, frame.width, frame.height, path) {
        Ok(()) => 1,
        Err(e) => {
            log::warn!("Failed to save {}: {}", path, e);
            0
        }
    }
}

// ============================================================================
// DISCOVERY API
// ============================================================================

/// Write up to `capacity` capture devices into `out`
///
/// Returns the total number found. Pass a null `out` to query the count.
///
/// # Safety
/// out must be null or hold `capacity` entries.
#[no_mangle]
pub unsafe extern "C" fn litecam_list_capture_devices(
    out: *mut CCaptureDeviceInfo,
    capacity: usize,
) -> usize {
    let devices = list_capture_devices(&CaptureConfig::default());

    if !out.is_null() {
        let out = std::slice::from_raw_parts_mut(out, capacity);
        for (slot, device) in out.iter_mut().zip(&devices) {
            slot.index = device.index;
            copy_c_string(&mut slot.friendly_name, &device.name);
        }
    }

    devices.len()
}

// ============================================================================
// UTILITY FUNCTIONS
// ============================================================================

/// Get library version string
///
/// # Safety
/// Returns a static string, safe to call.
#[no_mangle]
pub extern "C" fn litecam_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const c_char
}
