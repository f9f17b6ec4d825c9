// Configuration management for chunkrec

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::encoding::{ColorFormat, ContainerFormat, FormatSpec, VideoCodec};
use crate::recording::{ChunkLayout, DrainSettings};

/// Recorder configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecorderConfig {
    /// Encoded frame width in pixels
    pub width: u32,

    /// Encoded frame height in pixels
    pub height: u32,

    #[serde(default)]
    pub codec: VideoCodec,

    #[serde(default)]
    pub container: ContainerFormat,

    /// Target bitrate in bits per second
    pub bitrate: u32,

    /// Frames per second
    pub framerate: u32,

    /// Seconds between keyframes
    #[serde(default = "default_keyframe_interval_secs")]
    pub keyframe_interval_secs: u32,

    /// Length of each output file in seconds
    pub chunk_duration_secs: u32,

    /// Directory the chunk files are written to
    pub output_dir: PathBuf,

    /// File name prefix: `<prefix>.<w>x<h>.<n>.<ext>`
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// How long to wait for the camera before giving up on a frame
    #[serde(default = "default_frame_wait_timeout_ms")]
    pub frame_wait_timeout_ms: u64,

    /// Consecutive frame wait timeouts tolerated before recording fails
    #[serde(default = "default_max_frame_wait_timeouts")]
    pub max_frame_wait_timeouts: u32,

    /// Timeout of a single encoder output poll
    #[serde(default = "default_drain_poll_timeout_us")]
    pub drain_poll_timeout_us: u64,

    /// Empty polls tolerated while waiting for end of stream
    #[serde(default = "default_finalize_max_polls")]
    pub finalize_max_polls: u32,

    /// Fail instead of warn when the encoder ends a stream on its own
    #[serde(default)]
    pub unexpected_eos_fatal: bool,

    /// Alternate the fragment shader every N frames (debug aid)
    #[serde(default)]
    pub color_tweak_interval: Option<u32>,

    /// Stop after this many frames
    #[serde(default)]
    pub max_frames: Option<u64>,

    /// Write manifest.json next to the chunks when recording ends
    #[serde(default = "default_true")]
    pub write_manifest: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            codec: VideoCodec::H264,
            container: ContainerFormat::Mp4,
            bitrate: 6_000_000,
            framerate: 30,
            keyframe_interval_secs: default_keyframe_interval_secs(),
            chunk_duration_secs: 5,
            output_dir: get_default_output_dir(),
            file_prefix: default_file_prefix(),
            frame_wait_timeout_ms: default_frame_wait_timeout_ms(),
            max_frame_wait_timeouts: default_max_frame_wait_timeouts(),
            drain_poll_timeout_us: default_drain_poll_timeout_us(),
            finalize_max_polls: default_finalize_max_polls(),
            unexpected_eos_fatal: false,
            color_tweak_interval: None,
            max_frames: None,
            write_manifest: true,
        }
    }
}

impl RecorderConfig {
    /// Load config from disk or return default
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => {
                        log::warn!("Failed to parse config {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read config file {}: {}", path.display(), e);
                }
            }
        }

        Self::default()
    }

    /// Save config to disk
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    /// Reject values the recorder cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.width == 0 || self.height == 0 {
            anyhow::bail!("frame size must be non-zero, got {}x{}", self.width, self.height);
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            anyhow::bail!("frame size must be even for 4:2:0 encoding, got {}x{}", self.width, self.height);
        }
        if self.framerate == 0 {
            anyhow::bail!("framerate must be at least 1");
        }
        if self.bitrate == 0 {
            anyhow::bail!("bitrate must be at least 1");
        }
        if self.chunk_duration_secs == 0 {
            anyhow::bail!("chunk duration must be at least 1 second");
        }
        if self.file_prefix.is_empty() || self.file_prefix.contains(['/', '\\']) {
            anyhow::bail!("file prefix must be a non-empty file name, got {:?}", self.file_prefix);
        }
        if self.max_frame_wait_timeouts == 0 {
            anyhow::bail!("max_frame_wait_timeouts must be at least 1");
        }
        if self.finalize_max_polls == 0 {
            anyhow::bail!("finalize_max_polls must be at least 1");
        }
        if self.color_tweak_interval == Some(0) {
            anyhow::bail!("color_tweak_interval must be at least 1 when set");
        }
        Ok(())
    }

    /// Format requested from the encoder
    pub fn format_spec(&self) -> FormatSpec {
        FormatSpec {
            codec: self.codec,
            width: self.width,
            height: self.height,
            bitrate: self.bitrate,
            framerate: self.framerate,
            keyframe_interval_secs: self.keyframe_interval_secs,
            color_format: ColorFormat::Surface,
            codec_data: None,
        }
    }

    pub fn frames_per_chunk(&self) -> u64 {
        self.framerate as u64 * self.chunk_duration_secs as u64
    }

    pub fn frame_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_wait_timeout_ms)
    }

    pub fn drain_settings(&self) -> DrainSettings {
        DrainSettings {
            poll_timeout: Duration::from_micros(self.drain_poll_timeout_us),
            finalize_max_polls: self.finalize_max_polls,
            unexpected_eos_fatal: self.unexpected_eos_fatal,
            expected_tracks: 1,
        }
    }

    pub fn chunk_layout(&self) -> ChunkLayout {
        ChunkLayout {
            output_dir: self.output_dir.clone(),
            file_prefix: self.file_prefix.clone(),
            container: self.container,
        }
    }
}

/// Get the default directory for recordings
fn get_default_output_dir() -> PathBuf {
    dirs::video_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Videos")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chunkrec")
}

/// Default config file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chunkrec")
        .join("config.toml")
}

fn default_keyframe_interval_secs() -> u32 {
    5
}

fn default_file_prefix() -> String {
    "chunk".to_string()
}

fn default_frame_wait_timeout_ms() -> u64 {
    4500
}

fn default_max_frame_wait_timeouts() -> u32 {
    1
}

fn default_drain_poll_timeout_us() -> u64 {
    100
}

fn default_finalize_max_polls() -> u32 {
    10_000
}

/// Default true value (for serde)
fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_recording() {
        let config = RecorderConfig::default();
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.bitrate, 6_000_000);
        assert_eq!(config.framerate, 30);
        assert_eq!(config.frames_per_chunk(), 150);
        assert_eq!(config.format_spec().mime_type(), "video/avc");
        assert_eq!(config.frame_wait_timeout(), Duration::from_millis(4500));
        config.validate().unwrap();
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = RecorderConfig {
            codec: VideoCodec::H265,
            container: ContainerFormat::Mkv,
            output_dir: dir.path().join("out"),
            color_tweak_interval: Some(15),
            max_frames: Some(300),
            ..Default::default()
        };
        config.save(&path).unwrap();

        assert_eq!(RecorderConfig::load_or_default(&path), config);
    }

    #[test]
    fn missing_optional_fields_take_defaults() {
        let config: RecorderConfig = toml::from_str(
            r#"
            width = 1280
            height = 720
            bitrate = 4000000
            framerate = 25
            chunk_duration_secs = 2
            output_dir = "/tmp/rec"
            "#,
        )
        .unwrap();

        assert_eq!(config.codec, VideoCodec::H264);
        assert_eq!(config.file_prefix, "chunk");
        assert_eq!(config.frames_per_chunk(), 50);
        assert_eq!(config.drain_settings().finalize_max_polls, 10_000);
        assert!(config.write_manifest);
    }

    #[test]
    fn unreadable_config_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "width = \"wide\"").unwrap();

        assert_eq!(RecorderConfig::load_or_default(&path), RecorderConfig::default());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let odd = RecorderConfig { width: 641, ..Default::default() };
        assert!(odd.validate().is_err());

        let no_chunks = RecorderConfig { chunk_duration_secs: 0, ..Default::default() };
        assert!(no_chunks.validate().is_err());

        let bad_prefix = RecorderConfig { file_prefix: "a/b".into(), ..Default::default() };
        assert!(bad_prefix.validate().is_err());

        let tweak = RecorderConfig { color_tweak_interval: Some(0), ..Default::default() };
        assert!(tweak.validate().is_err());
    }
}
