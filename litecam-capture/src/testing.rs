//! In-memory capture driver for tests
//!
//! Clones share state, so a test can keep a handle after moving the driver
//! into a session and inspect or script it from the outside.

use crate::driver::{
    BufferInfo, Capabilities, CaptureDriver, DequeuedBuffer, FormatDescription, FrameSize,
    PixFormat, CAP_STREAMING, CAP_VIDEO_CAPTURE,
};
use litecam_video::{FOURCC_MJPEG, FOURCC_YUYV};
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::io;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub(crate) type FormatResponder = Box<dyn FnMut(PixFormat) -> io::Result<PixFormat> + Send>;

/// Driver calls, in the order they were made
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DriverEvent {
    QueryCapabilities,
    SetFormat(PixFormat),
    RequestBuffers(u32),
    Map(u32),
    Queue(u32),
    Dequeue(u32),
    StreamOn,
    StreamOff,
}

pub(crate) struct MockState {
    pub caps: Capabilities,
    pub fail_query_caps: bool,
    /// Decides what a format request is granted
    pub responder: FormatResponder,
    pub current: PixFormat,
    /// Buffers granted per request; `None` grants what was asked
    pub granted_buffers: Option<u32>,
    pub allocated: u32,
    pub fail_map_at: Option<u32>,
    /// Buffer contents, cycled over buffer indices
    pub payloads: Vec<Vec<u8>>,
    pub bytes_used: Option<u32>,
    /// Buffers currently queued to the "hardware", in fill order
    pub queued: VecDeque<u32>,
    pub streaming: bool,
    pub fail_dequeue: bool,
    pub fail_queue: bool,
    pub formats: Vec<(FormatDescription, Vec<FrameSize>)>,
    pub events: Vec<DriverEvent>,
}

impl MockState {
    fn payload_for(&self, index: u32) -> Vec<u8> {
        if self.payloads.is_empty() {
            let size = self.current.width as usize * self.current.height as usize * 2;
            return vec![0u8; size.max(1)];
        }
        self.payloads[index as usize % self.payloads.len()].clone()
    }
}

#[derive(Clone)]
pub(crate) struct MockDriver {
    shared: Arc<Mutex<MockState>>,
    live: Arc<AtomicUsize>,
}

impl MockDriver {
    /// Capture-capable device that grants every request verbatim
    pub fn new() -> Self {
        let state = MockState {
            caps: Capabilities {
                driver: "mock".into(),
                card: "Mock Camera".into(),
                bus_info: "platform:mock".into(),
                capabilities: CAP_VIDEO_CAPTURE | CAP_STREAMING,
                device_caps: 0,
            },
            fail_query_caps: false,
            responder: Box::new(|request: PixFormat| -> io::Result<PixFormat> { Ok(request) }),
            current: PixFormat::new(640, 480, FOURCC_YUYV),
            granted_buffers: None,
            allocated: 0,
            fail_map_at: None,
            payloads: Vec::new(),
            bytes_used: None,
            queued: VecDeque::new(),
            streaming: false,
            fail_dequeue: false,
            fail_queue: false,
            formats: vec![
                (
                    FormatDescription {
                        fourcc: FOURCC_YUYV,
                        description: "YUYV 4:2:2".into(),
                    },
                    vec![
                        FrameSize::Discrete { width: 640, height: 480 },
                        FrameSize::Discrete { width: 320, height: 240 },
                    ],
                ),
                (
                    FormatDescription {
                        fourcc: FOURCC_MJPEG,
                        description: "Motion-JPEG".into(),
                    },
                    vec![FrameSize::Discrete { width: 1280, height: 720 }],
                ),
            ],
            events: Vec::new(),
        };

        Self {
            shared: Arc::new(Mutex::new(state)),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Device that answers every format request with `granted`
    pub fn granting(granted: PixFormat) -> Self {
        let driver = Self::new();
        driver.state().responder =
            Box::new(move |_: PixFormat| -> io::Result<PixFormat> { Ok(granted) });
        driver
    }

    pub fn with_payload(self, payload: Vec<u8>) -> Self {
        self.state().payloads = vec![payload];
        self
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.shared.lock()
    }

    pub fn live_mappings(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<DriverEvent> {
        self.state().events.clone()
    }

    fn record(&self, event: DriverEvent) {
        self.state().events.push(event);
    }
}

fn os_error(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

pub(crate) struct MockMapping {
    data: Vec<u8>,
    live: Arc<AtomicUsize>,
}

impl Deref for MockMapping {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for MockMapping {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CaptureDriver for MockDriver {
    type Mapping = MockMapping;

    fn query_capabilities(&mut self) -> io::Result<Capabilities> {
        self.record(DriverEvent::QueryCapabilities);
        let state = self.state();
        if state.fail_query_caps {
            return Err(os_error(libc::ENOTTY));
        }
        Ok(state.caps.clone())
    }

    fn set_format(&mut self, request: PixFormat) -> io::Result<PixFormat> {
        self.record(DriverEvent::SetFormat(request));
        let mut state = self.state();
        if state.allocated > 0 {
            return Err(os_error(libc::EBUSY));
        }
        let granted = (state.responder)(request)?;
        state.current = granted;
        Ok(granted)
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        self.record(DriverEvent::RequestBuffers(count));
        let mut state = self.state();
        if count == 0 {
            state.allocated = 0;
            state.queued.clear();
            return Ok(0);
        }
        let granted = state.granted_buffers.unwrap_or(count);
        state.allocated = granted;
        Ok(granted)
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferInfo> {
        let state = self.state();
        if index >= state.allocated {
            return Err(os_error(libc::EINVAL));
        }
        Ok(BufferInfo {
            index,
            length: state.payload_for(index).len() as u32,
            offset: index * 0x1000,
        })
    }

    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<MockMapping> {
        self.record(DriverEvent::Map(info.index));
        let state = self.state();
        if state.fail_map_at == Some(info.index) {
            return Err(os_error(libc::ENOMEM));
        }

        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(MockMapping {
            data: state.payload_for(info.index),
            live: self.live.clone(),
        })
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        self.record(DriverEvent::Queue(index));
        let mut state = self.state();
        if state.fail_queue {
            return Err(os_error(libc::EIO));
        }
        if index >= state.allocated {
            return Err(os_error(libc::EINVAL));
        }
        state.queued.push_back(index);
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer> {
        let mut state = self.state();
        if state.fail_dequeue {
            return Err(os_error(libc::ENODEV));
        }
        if !state.streaming {
            return Err(os_error(libc::EINVAL));
        }
        let index = state
            .queued
            .pop_front()
            .ok_or_else(|| os_error(libc::EAGAIN))?;
        let bytes_used = state
            .bytes_used
            .unwrap_or_else(|| state.payload_for(index).len() as u32);

        state.events.push(DriverEvent::Dequeue(index));
        Ok(DequeuedBuffer { index, bytes_used })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        self.record(DriverEvent::StreamOn);
        self.state().streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.record(DriverEvent::StreamOff);
        let mut state = self.state();
        state.streaming = false;
        state.queued.clear();
        Ok(())
    }

    fn enum_formats(&mut self) -> io::Result<Vec<FormatDescription>> {
        Ok(self.state().formats.iter().map(|(desc, _)| desc.clone()).collect())
    }

    fn enum_frame_sizes(&mut self, fourcc: u32) -> io::Result<Vec<FrameSize>> {
        Ok(self
            .state()
            .formats
            .iter()
            .find(|(desc, _)| desc.fourcc == fourcc)
            .map(|(_, sizes)| sizes.clone())
            .unwrap_or_default())
    }
}
