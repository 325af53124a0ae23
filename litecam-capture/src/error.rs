//! Error types for litecam-capture

use crate::session::SessionState;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using CaptureError
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Failures of the capture session and its buffer exchange
///
/// Decode failures are not represented here: a frame that cannot be
/// decoded degrades to a blank frame instead of failing the capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Device path could not be opened or is not a capture device
    #[error("device {path} unavailable: {reason}")]
    DeviceUnavailable { path: PathBuf, reason: String },

    /// The handle became unusable while negotiating a format
    #[error("format negotiation failed: {0}")]
    FormatNegotiation(#[source] io::Error),

    /// The driver refused or under-granted the buffer request
    #[error("buffer allocation failed: {0}")]
    BufferAllocation(String),

    /// A granted buffer could not be queried or mapped
    #[error("failed to map buffer {index}: {source}")]
    BufferMap {
        index: u32,
        #[source]
        source: io::Error,
    },

    /// No buffer could be taken back from the driver
    #[error("failed to dequeue buffer: {0}")]
    Dequeue(#[source] io::Error),

    /// A buffer could not be handed (back) to the driver
    #[error("failed to queue buffer {index}: {source}")]
    Requeue {
        index: u32,
        #[source]
        source: io::Error,
    },

    /// Stream on/off was rejected
    #[error("stream control failed: {0}")]
    StreamControl(#[source] io::Error),

    /// Operation not valid in the current session state
    #[error("{operation} is not valid while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
}

impl CaptureError {
    pub fn unavailable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_state(operation: &'static str, state: SessionState) -> Self {
        Self::InvalidState { operation, state }
    }

    /// Whether the error ends the session (as opposed to one capture call)
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            CaptureError::Dequeue(_) | CaptureError::Requeue { .. } | CaptureError::InvalidState { .. }
        )
    }
}
