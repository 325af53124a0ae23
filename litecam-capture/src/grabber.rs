//! Dedicated capture thread
//!
//! Runs `Camera::capture_frame` in a loop on its own thread and hands every
//! frame to the consumer by value over a bounded channel. When the consumer
//! falls behind, new frames are dropped rather than queued.

use crate::camera::Camera;
use crate::driver::CaptureDriver;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use litecam_video::DecodedFrame;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Default)]
struct Counters {
    captured: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrabberStats {
    pub captured: u64,
    /// Frames discarded because the channel was full
    pub dropped: u64,
}

pub struct FrameGrabber<D: CaptureDriver> {
    frames: Receiver<DecodedFrame>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    handle: Option<JoinHandle<Camera<D>>>,
}

impl<D> FrameGrabber<D>
where
    D: CaptureDriver + Send + 'static,
    D::Mapping: Send,
{
    /// Move a streaming camera onto a capture thread
    ///
    /// `capacity` is the number of frames buffered for the consumer.
    pub fn spawn(camera: Camera<D>, capacity: usize) -> io::Result<Self> {
        let (sender, frames) = bounded(capacity.max(1));
        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(Counters::default());

        let handle = {
            let running = running.clone();
            let counters = counters.clone();
            thread::Builder::new()
                .name("litecam-grabber".into())
                .spawn(move || grab_loop(camera, sender, running, counters))?
        };

        log::info!("Frame grabber started (capacity {})", capacity.max(1));
        Ok(Self {
            frames,
            running,
            counters,
            handle: Some(handle),
        })
    }

    /// Receiving end of the frame channel
    pub fn frames(&self) -> &Receiver<DecodedFrame> {
        &self.frames
    }

    /// Next frame, or `None` on timeout or after the thread stopped
    pub fn recv_timeout(&self, timeout: Duration) -> Option<DecodedFrame> {
        match self.frames.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> GrabberStats {
        GrabberStats {
            captured: self.counters.captured.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop the thread and take the camera back
    ///
    /// Waits for the in-flight capture to finish. Returns `None` if the
    /// capture thread panicked.
    pub fn shutdown(mut self) -> Option<Camera<D>> {
        self.stop()
    }

    fn stop(&mut self) -> Option<Camera<D>> {
        self.running.store(false, Ordering::Release);
        let handle = self.handle.take()?;

        match handle.join() {
            Ok(camera) => {
                let stats = self.stats();
                log::info!(
                    "Frame grabber stopped: {} captured, {} dropped",
                    stats.captured,
                    stats.dropped
                );
                Some(camera)
            }
            Err(_) => {
                log::error!("Frame grabber thread panicked");
                None
            }
        }
    }
}

impl<D: CaptureDriver> Drop for FrameGrabber<D> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            // The returned camera is dropped here, which releases the device
            let _ = handle.join();
        }
    }
}

fn grab_loop<D: CaptureDriver>(
    mut camera: Camera<D>,
    sender: Sender<DecodedFrame>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
) -> Camera<D> {
    while running.load(Ordering::Acquire) {
        let frame = camera.capture_frame();
        if frame.is_empty() {
            log::warn!("Capture failed, frame grabber stopping");
            break;
        }
        counters.captured.fetch_add(1, Ordering::Relaxed);

        match sender.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
    }

    running.store(false, Ordering::Release);
    camera
}
