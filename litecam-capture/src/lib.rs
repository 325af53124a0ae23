//! LiteCam capture - V4L2 frame acquisition
//!
//! Opens a capture device, negotiates a pixel format the driver can deliver
//! (packed YUV 4:2:2, falling back to MJPEG), streams through a pool of
//! memory-mapped buffers and hands out RGB888 frames.
//!
//! - [`Camera`]: bool/sentinel contract for host applications
//! - [`DeviceSession`]: the underlying state machine, with typed errors
//! - [`list_capture_devices`]: scan `/dev/video*` for capture nodes
//! - [`FrameGrabber`]: capture on a dedicated thread

pub mod buffer_pool;
pub mod camera;
pub mod config;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod grabber;
pub mod session;
pub mod v4l2;

#[cfg(test)]
mod testing;

pub use buffer_pool::*;
pub use camera::*;
pub use config::*;
pub use discovery::*;
pub use driver::*;
pub use error::*;
pub use grabber::*;
pub use session::*;
pub use v4l2::{MmapRegion, V4l2Device};
