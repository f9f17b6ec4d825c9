// Chunkrec - chunked video recorder
// Main library entry point
//
// Camera frames arrive as an external texture, are drawn onto the encoder's
// input surface, and the encoded stream is split into fixed-length container
// files.

pub mod capture;
pub mod config;
pub mod container;
pub mod encoding;
pub mod recording;
pub mod render;

#[cfg(feature = "gst")]
pub mod gstreamer_init;

#[cfg(any(test, feature = "test-harness"))]
pub mod test_harness;

pub use config::RecorderConfig;
pub use recording::{Recorder, RecorderError, RecorderHandle, RecorderStatus, RecordingSummary, StopHandle};
