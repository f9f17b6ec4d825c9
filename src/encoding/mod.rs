// Video encoding
//
// Codec and container tables, the encoder output format, and the `EncoderPort`
// the recorder drives. An encoder accepts frames through a render target and
// hands back compressed access units that the drain sequencer forwards to the
// container sink.
//
// To add a new codec:
// 1. Add a variant to VideoCodec
// 2. Add its mime type, caps name and parser
// 3. Add encoder elements in gst_encoder.rs

#[cfg(feature = "gst")]
pub mod gst_encoder;

#[cfg(feature = "gst")]
pub use gst_encoder::{test_pattern_readback, GstEncoder, GstSurface, HardwareEncoderType, ReadbackFn};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Supported video codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// H.264/AVC
    #[default]
    H264,
    /// H.265/HEVC
    H265,
}

impl VideoCodec {
    pub const ALL: &'static [VideoCodec] = &[VideoCodec::H264, VideoCodec::H265];

    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/avc",
            VideoCodec::H265 => "video/hevc",
        }
    }

    pub fn from_mime_type(mime: &str) -> Option<VideoCodec> {
        match mime {
            "video/avc" => Some(VideoCodec::H264),
            "video/hevc" => Some(VideoCodec::H265),
            _ => None,
        }
    }

    /// Try to parse codec from GStreamer caps structure name
    pub fn from_gst_caps_name(name: &str) -> Option<VideoCodec> {
        match name {
            "video/x-h264" | "video/h264" => Some(VideoCodec::H264),
            "video/x-h265" | "video/x-hevc" | "video/h265" => Some(VideoCodec::H265),
            _ => None,
        }
    }

    pub fn gst_caps_name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/x-h264",
            VideoCodec::H265 => "video/x-h265",
        }
    }

    pub fn gst_parser(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264parse",
            VideoCodec::H265 => "h265parse",
        }
    }

    /// Stream format the container expects (length-prefixed, codec data in caps)
    pub fn gst_stream_format(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "avc",
            VideoCodec::H265 => "hvc1",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "H.264",
            VideoCodec::H265 => "H.265",
        }
    }
}

/// Supported container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    /// MP4 (.mp4)
    #[default]
    Mp4,
    /// Matroska (.mkv) - survives an unclean shutdown better than MP4
    Mkv,
}

impl ContainerFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Mkv => "mkv",
        }
    }

    pub fn gst_muxer(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4mux",
            ContainerFormat::Mkv => "matroskamux",
        }
    }
}

/// Pixel layout the encoder's input accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorFormat {
    /// Frames arrive through a GPU surface
    #[default]
    Surface,
    /// Frames arrive as packed RGBA copied from the GPU
    Rgba,
}

/// Stream format of an encoder, both as requested and as reported back
/// once output starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatSpec {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    /// Bits per second
    pub bitrate: u32,
    pub framerate: u32,
    pub keyframe_interval_secs: u32,
    #[serde(default)]
    pub color_format: ColorFormat,
    /// Decoder configuration record (SPS/PPS), known only after output starts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_data: Option<Vec<u8>>,
}

impl FormatSpec {
    pub fn mime_type(&self) -> &'static str {
        self.codec.mime_type()
    }

    /// Keyframe interval expressed in frames
    pub fn keyframe_interval_frames(&self) -> u32 {
        self.keyframe_interval_secs.saturating_mul(self.framerate).max(1)
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.framerate.max(1) as u64)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessUnitFlags {
    pub key_frame: bool,
    /// Decoder configuration rather than media data
    pub codec_config: bool,
    pub end_of_stream: bool,
}

/// One compressed output buffer, valid until released back to the encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    pub buffer_index: usize,
    pub data: Vec<u8>,
    /// Start of the payload within `data`
    pub offset: usize,
    /// Payload length; may be zero
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: AccessUnitFlags,
}

impl AccessUnit {
    /// The valid region of the buffer, clamped to its bounds
    pub fn payload(&self) -> &[u8] {
        let start = self.offset.min(self.data.len());
        let end = self.offset.saturating_add(self.size).min(self.data.len());
        &self.data[start..end]
    }
}

/// Result of one output poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderOutput {
    NoOutputYet,
    FormatChanged(FormatSpec),
    BufferReady(AccessUnit),
    EndOfStream,
}

/// Timestamp origin shared by every encoder of one recording.
///
/// The first capture timestamp seen becomes zero. Encoders started for later
/// chunks keep counting from the same origin, so output timestamps keep
/// increasing from one chunk file to the next.
#[derive(Debug, Clone, Default)]
pub struct TimelineOrigin {
    base_nanos: Arc<Mutex<Option<i64>>>,
}

impl TimelineOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nanoseconds between the origin and `timestamp_nanos`, clamped at zero
    pub fn offset_nanos(&self, timestamp_nanos: i64) -> u64 {
        let base = *self.base_nanos.lock().get_or_insert(timestamp_nanos);
        timestamp_nanos.saturating_sub(base).max(0) as u64
    }
}

/// Error type for encoder operations
#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("Encoder configuration failed: {0}")]
    Configure(String),

    #[error("Encoder used after stop: {0}")]
    UsedAfterStop(&'static str),

    #[error("Input surface error: {0}")]
    Surface(String),

    #[error("Encoder error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, EncoderError>;

/// Where the render stage draws a frame before it is handed to the encoder
pub trait RenderTarget {
    /// Make this target current for GL calls on the calling thread
    fn make_current(&mut self) -> Result<()>;

    /// Detach and free the target. Safe to call more than once.
    fn release(&mut self) -> Result<()>;
}

/// A started encoder
///
/// Input is pushed by rendering into the target and calling `publish`.
/// Output is pulled with `poll_output`, and every `BufferReady` must be
/// handed back with `release_output`.
pub trait EncoderPort {
    type Target: RenderTarget;

    /// Submit what was last drawn into `target` with the given timestamp.
    /// May block while the encoder's input queue is full.
    fn publish(&mut self, target: &mut Self::Target, timestamp_nanos: i64) -> Result<()>;

    fn poll_output(&mut self, timeout: Duration) -> Result<EncoderOutput>;

    fn release_output(&mut self, buffer_index: usize) -> Result<()>;

    /// No more input will follow; the encoder should flush and report end of stream
    fn signal_end_of_input(&mut self) -> Result<()>;

    /// Stop and free the encoder. Safe to call more than once.
    fn stop(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_clamped_to_buffer() {
        let unit = AccessUnit {
            buffer_index: 0,
            data: vec![1, 2, 3, 4],
            offset: 2,
            size: 10,
            presentation_time_us: 0,
            flags: AccessUnitFlags::default(),
        };
        assert_eq!(unit.payload(), &[3, 4]);

        let empty = AccessUnit { offset: 9, size: 0, ..unit };
        assert!(empty.payload().is_empty());
    }

    #[test]
    fn mime_types_round_trip() {
        for codec in VideoCodec::ALL {
            assert_eq!(VideoCodec::from_mime_type(codec.mime_type()), Some(*codec));
            assert_eq!(VideoCodec::from_gst_caps_name(codec.gst_caps_name()), Some(*codec));
        }
    }

    #[test]
    fn timeline_continues_across_encoders() {
        let origin = TimelineOrigin::new();
        let first_chunk = origin.clone();
        let second_chunk = origin.clone();

        assert_eq!(first_chunk.offset_nanos(1_000_000_000), 0);
        let last_of_first = first_chunk.offset_nanos(1_000_000_000 + 149 * 33_333_333);
        let first_of_second = second_chunk.offset_nanos(1_000_000_000 + 150 * 33_333_333);

        assert_eq!(last_of_first, 149 * 33_333_333);
        assert!(first_of_second > last_of_first);
        assert_eq!(second_chunk.offset_nanos(0), 0);
    }

    #[test]
    fn keyframe_interval_in_frames() {
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
        assert_eq!(spec.keyframe_interval_frames(), 150);
        assert_eq!(spec.mime_type(), "video/avc");
    }
}
