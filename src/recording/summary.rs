// Recording summary and chunk manifest

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::encoding::FormatSpec;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// One finished chunk file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkFileInfo {
    /// 1-based chunk number
    pub index: u32,
    pub filename: String,
    pub path: PathBuf,
    pub started_at: DateTime<Utc>,
    /// Frames published to this chunk's encoder
    pub frames: u64,
    /// Samples written to the container
    pub samples: u64,
    pub first_pts_us: Option<i64>,
    pub last_pts_us: Option<i64>,
    pub size_bytes: u64,
    /// The encoder reached end of stream before the file was closed
    pub finalized: bool,
    #[serde(default)]
    pub unexpected_end_of_stream: bool,
}

impl ChunkFileInfo {
    /// Span between the first and last sample, in seconds
    pub fn duration_secs(&self) -> f64 {
        match (self.first_pts_us, self.last_pts_us) {
            (Some(first), Some(last)) if last >= first => (last - first) as f64 / 1_000_000.0,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordingStats {
    pub frames_rendered: u64,
    /// Frame notifications that arrived while one was still pending
    pub dropped_notifications: u64,
    pub frame_wait_timeouts: u64,
    pub rotations: u64,
    pub unexpected_end_of_stream: u64,
}

/// Everything known about a finished recording
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordingSummary {
    pub recording_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub output_dir: PathBuf,
    pub format: FormatSpec,
    pub chunks: Vec<ChunkFileInfo>,
    pub stats: RecordingStats,
}

impl RecordingSummary {
    pub fn total_samples(&self) -> u64 {
        self.chunks.iter().map(|c| c.samples).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.chunks.iter().map(|c| c.size_bytes).sum()
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(MANIFEST_FILE_NAME)
    }

    /// Write `manifest.json` into the output directory
    pub fn write_manifest(&self) -> anyhow::Result<PathBuf> {
        let path = self.manifest_path();
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(path)
    }

    pub fn load_manifest(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::scripted::test_format;

    fn chunk(index: u32, samples: u64, first: i64, last: i64) -> ChunkFileInfo {
        ChunkFileInfo {
            index,
            filename: format!("chunk.640x480.{}.mp4", index),
            path: PathBuf::from(format!("chunk.640x480.{}.mp4", index)),
            started_at: Utc::now(),
            frames: samples,
            samples,
            first_pts_us: Some(first),
            last_pts_us: Some(last),
            size_bytes: 1024,
            finalized: true,
            unexpected_end_of_stream: false,
        }
    }

    #[test]
    fn manifest_survives_a_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let summary = RecordingSummary {
            recording_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            output_dir: dir.path().to_path_buf(),
            format: test_format(),
            chunks: vec![chunk(1, 150, 0, 4_966_666), chunk(2, 150, 5_000_000, 9_966_666)],
            stats: RecordingStats { frames_rendered: 300, rotations: 1, ..Default::default() },
        };

        let path = summary.write_manifest().unwrap();
        assert_eq!(path, dir.path().join(MANIFEST_FILE_NAME));

        let loaded = RecordingSummary::load_manifest(&path).unwrap();
        assert_eq!(loaded, summary);
        assert_eq!(loaded.total_samples(), 300);
        assert_eq!(loaded.total_bytes(), 2048);
    }

    #[test]
    fn duration_spans_first_to_last_sample() {
        let info = chunk(1, 150, 1_000_000, 3_500_000);
        assert!((info.duration_secs() - 2.5).abs() < 1e-9);

        let empty = ChunkFileInfo { first_pts_us: None, last_pts_us: None, ..info };
        assert_eq!(empty.duration_secs(), 0.0);
    }
}
