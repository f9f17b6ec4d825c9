// Container sink contract and chunk file naming
//
// A sink takes one or more tracks, is started once every track is known,
// accepts samples, and is finally stopped and released. Writing before
// start is an error; stopping a sink that never started must not fail.

#[cfg(feature = "gst")]
pub mod gst_muxer;

#[cfg(feature = "gst")]
pub use gst_muxer::GstMuxerSink;

use std::fmt;
use std::path::{Path, PathBuf};

use crate::encoding::{ContainerFormat, FormatSpec};

/// Track handle returned by `add_track`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackIndex(pub usize);

impl fmt::Display for TrackIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-sample metadata passed alongside the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    pub presentation_time_us: i64,
    pub key_frame: bool,
}

/// Error type for container operations
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("Muxer hasn't started")]
    NotStarted,

    #[error("Unknown track {0}")]
    UnknownTrack(TrackIndex),

    #[error("Invalid muxer state: {0}")]
    InvalidState(&'static str),

    #[error("Muxer error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ContainerError>;

pub trait ContainerSink {
    /// Register a track. Only valid before `start`.
    fn add_track(&mut self, format: &FormatSpec) -> Result<TrackIndex>;

    fn start(&mut self) -> Result<()>;

    fn write_sample(&mut self, track: TrackIndex, payload: &[u8], info: &SampleInfo) -> Result<()>;

    /// Finalize the file. Must succeed on a sink that was never started.
    fn stop(&mut self) -> Result<()>;

    /// Free the sink's resources. Safe to call more than once.
    fn release(&mut self) -> Result<()>;
}

/// Path of chunk `index` (1-based): `<dir>/<prefix>.<w>x<h>.<index>.<ext>`
pub fn chunk_path(
    output_dir: &Path,
    prefix: &str,
    spec: &FormatSpec,
    container: ContainerFormat,
    index: u32,
) -> PathBuf {
    output_dir.join(format!(
        "{}.{}x{}.{}.{}",
        prefix,
        spec.width,
        spec.height,
        index,
        container.extension()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{ColorFormat, VideoCodec};

    #[test]
    fn chunk_paths_are_numbered_from_one() {
        let spec = FormatSpec {
            codec: VideoCodec::H264,
            width: 640,
            height: 480,
            bitrate: 6_000_000,
            framerate: 30,
            keyframe_interval_secs: 5,
            color_format: ColorFormat::Surface,
            codec_data: None,
        };
        let dir = Path::new("/tmp/rec");

        assert_eq!(
            chunk_path(dir, "chunktest", &spec, ContainerFormat::Mp4, 1),
            PathBuf::from("/tmp/rec/chunktest.640x480.1.mp4")
        );
        assert_eq!(
            chunk_path(dir, "chunktest", &spec, ContainerFormat::Mkv, 12),
            PathBuf::from("/tmp/rec/chunktest.640x480.12.mkv")
        );
    }
}
