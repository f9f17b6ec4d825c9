// Recording: the render loop, chunk rotation and encoder draining

pub mod backend;
pub mod chunk;
pub mod drain;
pub mod recorder;
pub mod session;
pub mod summary;
pub mod teardown;

pub use backend::MediaBackend;
pub use chunk::{ChunkController, ChunkLayout};
pub use drain::{DrainReport, DrainSequencer, DrainSettings, DrainState};
pub use recorder::{Recorder, RecorderHandle, StopHandle};
pub use session::ChunkSession;
pub use summary::{ChunkFileInfo, RecordingStats, RecordingSummary, MANIFEST_FILE_NAME};
pub use teardown::{TeardownFailure, TeardownReport};

#[cfg(feature = "gst")]
pub use backend::GstBackend;

use serde::{Deserialize, Serialize};

use crate::capture::CaptureError;
use crate::container::ContainerError;
use crate::encoding::EncoderError;
use crate::render::GraphicsError;

/// Current recorder state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecorderStatus {
    /// Created, not yet running
    Idle,
    /// Opening the first chunk and configuring the render stage
    Starting,
    /// Rendering frames into the current chunk
    Recording,
    /// Finalizing one chunk and opening the next
    Rotating,
    /// Releasing resources
    Stopping,
    /// Finished cleanly
    Stopped,
    /// Stopped because of an error
    Failed,
}

impl RecorderStatus {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RecorderStatus::Starting | RecorderStatus::Recording | RecorderStatus::Rotating | RecorderStatus::Stopping
        )
    }
}

/// Error type for the recorder
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Graphics(#[from] GraphicsError),

    #[error(transparent)]
    Encoder(#[from] EncoderError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error("Format changed twice")]
    DuplicateFormatChange,

    #[error("Muxer hasn't started, cannot write samples")]
    SamplesBeforeMuxerStart,

    #[error("Encoder did not reach end of stream after {polls} polls")]
    FinalizeTimeout { polls: u32 },

    #[error("Reached end of stream unexpectedly")]
    UnexpectedEndOfStream,

    #[error("No active chunk")]
    NotRecording,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Teardown incomplete: {0}")]
    Teardown(TeardownReport),

    #[error("Recorder thread panicked")]
    ThreadPanicked,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecorderError {
    /// Which part of the pipeline raised the error
    pub fn component(&self) -> &'static str {
        match self {
            RecorderError::Capture(_) => "capture",
            RecorderError::Graphics(_) => "render",
            RecorderError::Encoder(_) => "encoder",
            RecorderError::Container(_) => "container",
            RecorderError::DuplicateFormatChange
            | RecorderError::SamplesBeforeMuxerStart
            | RecorderError::FinalizeTimeout { .. }
            | RecorderError::UnexpectedEndOfStream => "drain",
            RecorderError::NotRecording | RecorderError::Teardown(_) | RecorderError::ThreadPanicked => "chunk",
            RecorderError::Config(_) => "config",
            RecorderError::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, RecorderError>;
