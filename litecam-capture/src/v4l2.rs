//! V4L2 kernel driver on top of the `v4l` crate
//!
//! Format negotiation and enumeration use the crate's `Capture` API. The
//! buffer queue protocol stays explicit: REQBUFS, QUERYBUF, QBUF, DQBUF and
//! stream control go through `v4l::v4l2::ioctl` with the `v4l_sys` structures,
//! so ownership of every buffer is decided by the session and not by a
//! library stream.

use crate::driver::{
    BufferInfo, Capabilities, CaptureDriver, DequeuedBuffer, FormatDescription, FrameSize,
    PixFormat,
};
use libc::c_void;
use std::io;
use std::mem;
use std::ops::Deref;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use v4l::buffer::Type as BufferType;
use v4l::framesize::FrameSizeEnum;
use v4l::v4l2::{self, vidioc};
use v4l::v4l_sys::{v4l2_buffer, v4l2_capability, v4l2_requestbuffers};
use v4l::video::Capture;
use v4l::{Device, Format, FourCC, Memory};

/// Issue an ioctl, restarting it when interrupted by a signal
fn xioctl<T>(fd: RawFd, request: vidioc::_IOC_TYPE, arg: &mut T) -> io::Result<()> {
    loop {
        // SAFETY: `arg` is the live v4l_sys structure `request` expects
        match unsafe { v4l2::ioctl(fd, request, arg as *mut T as *mut c_void) } {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

/// NUL-terminated byte array to String
fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn capture_buffer(index: u32) -> v4l2_buffer {
    v4l2_buffer {
        index,
        type_: BufferType::VideoCapture as u32,
        memory: Memory::Mmap as u32,
        // SAFETY: all-zero is a valid v4l2_buffer
        ..unsafe { mem::zeroed() }
    }
}

fn to_fourcc(code: u32) -> FourCC {
    FourCC::new(&code.to_le_bytes())
}

fn from_fourcc(fourcc: FourCC) -> u32 {
    u32::from_le_bytes(fourcc.repr)
}

fn to_frame_size(size: &FrameSizeEnum) -> FrameSize {
    match size {
        FrameSizeEnum::Discrete(d) => FrameSize::Discrete {
            width: d.width,
            height: d.height,
        },
        FrameSizeEnum::Stepwise(s) => FrameSize::Stepwise {
            min_width: s.min_width,
            min_height: s.min_height,
            max_width: s.max_width,
            max_height: s.max_height,
            step_width: s.step_width,
            step_height: s.step_height,
        },
    }
}

// ============================================================================
// MAPPED MEMORY
// ============================================================================

/// Driver buffer mapped into the process; unmapped on drop
pub struct MmapRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// The mapping is only read while the buffer is software-owned
unsafe impl Send for MmapRegion {}

impl MmapRegion {
    fn map(fd: RawFd, length: usize, offset: u32) -> io::Result<Self> {
        if length == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "zero-length buffer"));
        }

        // SAFETY: fresh shared mapping of a driver buffer; the kernel validates offset
        let ptr = unsafe {
            v4l2::mmap(
                std::ptr::null_mut(),
                length,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                offset as libc::off_t,
            )?
        };

        NonNull::new(ptr as *mut u8)
            .map(|ptr| Self { ptr, len: length })
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))
    }
}

impl Deref for MmapRegion {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the mapping stays valid for `len` bytes until drop
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: unmapping exactly the region returned by mmap
        if let Err(e) = unsafe { v4l2::munmap(self.ptr.as_ptr() as *mut c_void, self.len) } {
            log::warn!("munmap failed: {}", e);
        }
    }
}

// ============================================================================
// DEVICE
// ============================================================================

/// Open V4L2 device node
///
/// [`CaptureDriver::dequeue_buffer`] polls for a filled buffer before
/// dequeuing, so it blocks even on a non-blocking handle. The handle closes
/// when the device is dropped.
pub struct V4l2Device {
    device: Device,
    path: PathBuf,
}

impl V4l2Device {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        Ok(Self {
            device: Device::with_path(path)?,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fd(&self) -> RawFd {
        self.device.handle().fd()
    }

    /// Block until the driver has a filled buffer
    fn wait_readable(&self) -> io::Result<()> {
        let mut pfd = libc::pollfd {
            fd: self.fd(),
            events: libc::POLLIN,
            revents: 0,
        };

        loop {
            // SAFETY: one valid pollfd
            let ret = unsafe { libc::poll(&mut pfd, 1, -1) };
            if ret > 0 {
                return Ok(());
            }

            let err = io::Error::last_os_error();
            if ret < 0 && err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

impl CaptureDriver for V4l2Device {
    type Mapping = MmapRegion;

    fn query_capabilities(&mut self) -> io::Result<Capabilities> {
        // Raw QUERYCAP: node filtering needs both `capabilities` and `device_caps`
        // SAFETY: all-zero is a valid v4l2_capability
        let mut cap: v4l2_capability = unsafe { mem::zeroed() };
        xioctl(self.fd(), vidioc::VIDIOC_QUERYCAP, &mut cap)?;

        Ok(Capabilities {
            driver: c_string(&cap.driver),
            card: c_string(&cap.card),
            bus_info: c_string(&cap.bus_info),
            capabilities: cap.capabilities,
            device_caps: cap.device_caps,
        })
    }

    fn set_format(&mut self, request: PixFormat) -> io::Result<PixFormat> {
        let wanted = Format::new(request.width, request.height, to_fourcc(request.fourcc));
        let granted = Capture::set_format(&self.device, &wanted)?;

        log::debug!(
            "S_FMT {}: sizeimage={} bytesperline={}",
            self.path.display(),
            granted.size,
            granted.stride
        );

        Ok(PixFormat::new(granted.width, granted.height, from_fourcc(granted.fourcc)))
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        let mut req = v4l2_requestbuffers {
            count,
            type_: BufferType::VideoCapture as u32,
            memory: Memory::Mmap as u32,
            // SAFETY: all-zero is a valid v4l2_requestbuffers
            ..unsafe { mem::zeroed() }
        };
        xioctl(self.fd(), vidioc::VIDIOC_REQBUFS, &mut req)?;
        Ok(req.count)
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferInfo> {
        let mut buf = capture_buffer(index);
        xioctl(self.fd(), vidioc::VIDIOC_QUERYBUF, &mut buf)?;

        Ok(BufferInfo {
            index,
            length: buf.length,
            // SAFETY: `offset` is the active member for MMAP buffers
            offset: unsafe { buf.m.offset },
        })
    }

    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<MmapRegion> {
        MmapRegion::map(self.fd(), info.length as usize, info.offset)
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        let mut buf = capture_buffer(index);
        xioctl(self.fd(), vidioc::VIDIOC_QBUF, &mut buf)
    }

    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer> {
        loop {
            self.wait_readable()?;

            let mut buf = capture_buffer(0);
            match xioctl(self.fd(), vidioc::VIDIOC_DQBUF, &mut buf) {
                Ok(()) => {
                    return Ok(DequeuedBuffer {
                        index: buf.index,
                        bytes_used: buf.bytesused,
                    })
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn stream_on(&mut self) -> io::Result<()> {
        let mut buf_type = BufferType::VideoCapture as u32;
        xioctl(self.fd(), vidioc::VIDIOC_STREAMON, &mut buf_type)
    }

    fn stream_off(&mut self) -> io::Result<()> {
        let mut buf_type = BufferType::VideoCapture as u32;
        xioctl(self.fd(), vidioc::VIDIOC_STREAMOFF, &mut buf_type)
    }

    fn enum_formats(&mut self) -> io::Result<Vec<FormatDescription>> {
        let formats = Capture::enum_formats(&self.device)?;

        Ok(formats
            .into_iter()
            .map(|desc| FormatDescription {
                fourcc: from_fourcc(desc.fourcc),
                description: desc.description,
            })
            .collect())
    }

    fn enum_frame_sizes(&mut self, fourcc: u32) -> io::Result<Vec<FrameSize>> {
        let sizes = Capture::enum_framesizes(&self.device, to_fourcc(fourcc))?;
        Ok(sizes.iter().map(|size| to_frame_size(&size.size)).collect())
    }
}
