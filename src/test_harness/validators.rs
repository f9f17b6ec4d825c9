use std::path::Path;

use crate::recording::{RecordingSummary, MANIFEST_FILE_NAME};

use super::loopback::{JournalEvent, SinkRecord};

// ── Loopback chunk validation ────────────────────────────────────────

#[derive(Debug)]
pub struct ChunkValidation {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub samples: usize,
    pub key_frames: usize,
    pub first_pts_us: Option<i64>,
    pub last_pts_us: Option<i64>,
}

/// Parse a chunk written by the loopback sink and check the call order:
/// one track, one start before any sample, strictly increasing timestamps,
/// and a stop after the last sample.
pub fn validate_chunk_dump(path: &Path) -> Result<ChunkValidation, String> {
    let content = std::fs::read_to_string(path).map_err(|e| format!("Failed to read chunk: {}", e))?;
    let record: SinkRecord =
        serde_json::from_str(&content).map_err(|e| format!("Chunk is not a loopback dump: {}", e))?;

    let mut track = None;
    let mut started = false;
    let mut last_pts: Option<i64> = None;
    let mut validation = ChunkValidation {
        mime: String::new(),
        width: 0,
        height: 0,
        samples: 0,
        key_frames: 0,
        first_pts_us: None,
        last_pts_us: None,
    };

    for event in &record.events {
        match event {
            JournalEvent::AddTrack { mime, width, height, codec_data_len } => {
                if track.is_some() {
                    return Err("More than one track added".into());
                }
                if started {
                    return Err("Track added after start".into());
                }
                if *codec_data_len == 0 {
                    return Err("Track has no codec data".into());
                }
                validation.mime = mime.clone();
                validation.width = *width;
                validation.height = *height;
                track = Some(0usize);
            }
            JournalEvent::Start => {
                if started {
                    return Err("Started twice".into());
                }
                if track.is_none() {
                    return Err("Started without a track".into());
                }
                started = true;
            }
            JournalEvent::WriteSample { track: t, pts_us, size, key_frame } => {
                if !started {
                    return Err("Sample written before start".into());
                }
                if Some(*t) != track {
                    return Err(format!("Sample written to unknown track {}", t));
                }
                if *size == 0 {
                    return Err(format!("Empty sample at {}us", pts_us));
                }
                if validation.samples == 0 && !key_frame {
                    return Err("First sample is not a key frame".into());
                }
                if last_pts.is_some_and(|last| *pts_us <= last) {
                    return Err(format!("Timestamp {}us does not advance past {:?}", pts_us, last_pts));
                }
                last_pts = Some(*pts_us);
                validation.first_pts_us.get_or_insert(*pts_us);
                validation.samples += 1;
                if *key_frame {
                    validation.key_frames += 1;
                }
            }
            JournalEvent::Stop | JournalEvent::Release => {}
        }
    }

    if !record.events.iter().any(|e| matches!(e, JournalEvent::Stop)) {
        return Err("Chunk was never stopped".into());
    }
    validation.last_pts_us = last_pts;
    Ok(validation)
}

// ── Manifest validation ──────────────────────────────────────────────

/// Load the manifest from `dir` and check every chunk it lists exists and
/// has the recorded size.
pub fn validate_manifest(dir: &Path) -> Result<RecordingSummary, String> {
    let path = dir.join(MANIFEST_FILE_NAME);
    let summary = RecordingSummary::load_manifest(&path)
        .map_err(|e| format!("{} not found or invalid: {}", path.display(), e))?;

    for (i, chunk) in summary.chunks.iter().enumerate() {
        if chunk.index as usize != i + 1 {
            return Err(format!("Chunk {} listed at position {}", chunk.index, i + 1));
        }
        let file = dir.join(&chunk.filename);
        let size = std::fs::metadata(&file)
            .map_err(|e| format!("Missing chunk {}: {}", file.display(), e))?
            .len();
        if size != chunk.size_bytes {
            return Err(format!(
                "{} is {} bytes, manifest says {}",
                chunk.filename, size, chunk.size_bytes
            ));
        }
    }

    Ok(summary)
}

// ── Container validation (via GStreamer Discoverer) ──────────────────

#[cfg(feature = "gst")]
#[derive(Debug)]
pub struct ContainerValidation {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: String,
}

/// Validate an MP4 or MKV chunk using GStreamer's Discoverer.
#[cfg(feature = "gst")]
pub fn validate_container(path: &Path) -> Result<ContainerValidation, String> {
    use gstreamer_pbutils::prelude::*;

    crate::gstreamer_init::init_gstreamer().map_err(|e| e.to_string())?;

    let absolute = path
        .canonicalize()
        .map_err(|e| format!("Failed to resolve {}: {}", path.display(), e))?;
    let uri = gstreamer::glib::filename_to_uri(&absolute, None)
        .map_err(|e| format!("Failed to build URI for {}: {}", absolute.display(), e))?;

    let discoverer = gstreamer_pbutils::Discoverer::new(gstreamer::ClockTime::from_seconds(10))
        .map_err(|e| format!("Failed to create Discoverer: {}", e))?;

    let info = discoverer
        .discover_uri(&uri)
        .map_err(|e| format!("Discoverer failed for {}: {}", uri, e))?;

    let duration_secs = info
        .duration()
        .map(|d| d.nseconds() as f64 / 1_000_000_000.0)
        .unwrap_or(0.0);

    let mut width: u32 = 0;
    let mut height: u32 = 0;
    let mut fps: f64 = 0.0;
    let mut codec = String::new();

    for stream in info.video_streams() {
        width = stream.width();
        height = stream.height();
        let fps_n = stream.framerate().numer() as f64;
        let fps_d = stream.framerate().denom() as f64;
        if fps_d > 0.0 {
            fps = fps_n / fps_d;
        }
        if let Some(caps) = stream.caps() {
            if let Some(structure) = caps.structure(0) {
                codec = structure.name().to_string();
            }
        }
    }

    if width == 0 || height == 0 {
        return Err("No video stream found".into());
    }

    Ok(ContainerValidation { duration_secs, width, height, fps, codec })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_dump(dir: &Path, events: Vec<JournalEvent>) -> std::path::PathBuf {
        let path = dir.join("chunk.640x480.1.mp4");
        let record = SinkRecord { path: path.clone(), events };
        std::fs::write(&path, serde_json::to_string(&record).unwrap()).unwrap();
        path
    }

    fn track() -> JournalEvent {
        JournalEvent::AddTrack { mime: "video/avc".into(), width: 640, height: 480, codec_data_len: 6 }
    }

    fn sample(pts_us: i64, key_frame: bool) -> JournalEvent {
        JournalEvent::WriteSample { track: 0, pts_us, size: 13, key_frame }
    }

    #[test]
    fn well_ordered_dump_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dump(
            dir.path(),
            vec![track(), JournalEvent::Start, sample(0, true), sample(33_333, false), JournalEvent::Stop],
        );

        let v = validate_chunk_dump(&path).unwrap();
        assert_eq!(v.samples, 2);
        assert_eq!(v.key_frames, 1);
        assert_eq!((v.width, v.height), (640, 480));
        assert_eq!(v.last_pts_us, Some(33_333));
    }

    #[test]
    fn sample_before_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dump(dir.path(), vec![track(), sample(0, true), JournalEvent::Start, JournalEvent::Stop]);
        assert!(validate_chunk_dump(&path).is_err());
    }

    #[test]
    fn repeated_timestamp_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dump(
            dir.path(),
            vec![track(), JournalEvent::Start, sample(0, true), sample(0, false), JournalEvent::Stop],
        );
        assert!(validate_chunk_dump(&path).is_err());
    }
}
