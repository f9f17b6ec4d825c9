// Frame capture interface
//
// The capture device itself (camera acquisition, resolution negotiation) lives
// outside this crate. The recorder only needs something that can deliver frames
// into a GPU texture, raise a notification per frame, and report the per-frame
// sampling transform.

pub mod signal;
pub mod synthetic;

pub use signal::{FrameReadySignal, NotifyOutcome};
pub use synthetic::{Pacing, SyntheticCamera};

use std::sync::Arc;
use std::time::Duration;

use crate::render::TextureId;

/// Column-major 4x4 matrix
pub type Transform = [f32; 16];

pub const IDENTITY_TRANSFORM: Transform = [
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 1.0, 0.0,
    0.0, 0.0, 0.0, 1.0,
];

/// Flips the V texture coordinate, the usual correction for camera buffers
pub const VERTICAL_FLIP_TRANSFORM: Transform = [
    1.0, 0.0, 0.0, 0.0,
    0.0, -1.0, 0.0, 0.0,
    0.0, 0.0, 1.0, 0.0,
    0.0, 1.0, 0.0, 1.0,
];

/// A frame latched into the external texture
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    /// Sequence number assigned by the capture device
    pub sequence: u64,
    /// Capture timestamp in nanoseconds, monotonically increasing
    pub timestamp_nanos: i64,
    /// Sampling-region correction supplied by the device
    pub transform: Transform,
}

/// Error type for capture operations
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Camera frame wait timed out after {0:?}")]
    WaitTimeout(Duration),

    #[error("Capture device error: {0}")]
    Device(String),
}

/// A source of GPU-resident frames
pub trait CaptureDevice {
    /// Start producing frames into `texture`, calling `signal.notify()` from
    /// the device's own thread each time a new frame is ready.
    fn start(&mut self, texture: TextureId, signal: Arc<FrameReadySignal>) -> Result<(), CaptureError>;

    /// Latch the most recent frame into the texture and return its metadata.
    fn latch(&mut self) -> Result<Frame, CaptureError>;

    /// Stop production and release the device. Must tolerate repeated calls.
    fn stop(&mut self) -> Result<(), CaptureError>;
}
