use crate::config::RecorderConfig;
use crate::encoding::{ContainerFormat, VideoCodec};

use super::runner::{Expected, TestCase};

/// Build the full scenario matrix.
pub fn build_test_matrix() -> Vec<TestCase> {
    let mut tests = Vec::new();

    // ── Chunk boundaries ─────────────────────────────────────────────

    // single_chunk_2s: shorter than one chunk
    tests.push(make_case("single_chunk_2s", 30, 5, 60, 2, base_config()));

    // two_chunks_10s: exactly two full chunks at the reference settings
    tests.push(make_case("two_chunks_10s", 30, 5, 300, 3, base_config()));

    // partial_last_chunk: 2s chunks, recording ends a third of a second into chunk 3
    tests.push(make_case("partial_last_chunk", 30, 2, 130, 2, base_config()));

    // one_second_chunks_60fps: many rotations with a deep encoder queue
    tests.push(make_case("one_second_chunks_60fps", 60, 1, 200, 8, base_config()));

    // no_latency: encoder output available immediately after each frame
    tests.push(make_case("no_latency", 30, 1, 75, 0, base_config()));

    // ── Formats ──────────────────────────────────────────────────────

    tests.push(make_case(
        "mkv_container",
        30, 1, 45, 2,
        RecorderConfig { container: ContainerFormat::Mkv, ..base_config() },
    ));

    tests.push(make_case(
        "h265_24fps",
        24, 2, 100, 4,
        RecorderConfig { codec: VideoCodec::H265, width: 1280, height: 720, ..base_config() },
    ));

    // ── Shader switching ─────────────────────────────────────────────

    tests.push(make_case(
        "color_tweak_every_15",
        30, 5, 90, 2,
        RecorderConfig { color_tweak_interval: Some(15), ..base_config() },
    ));

    // Even interval: every switch lands on an even frame, the swapped shader never runs
    tests.push(make_case(
        "color_tweak_every_10",
        30, 1, 60, 2,
        RecorderConfig { color_tweak_interval: Some(10), ..base_config() },
    ));

    tests
}

/// Short recordings through the real GStreamer encoder and muxer.
#[cfg(feature = "gst")]
pub fn build_gst_matrix() -> Vec<TestCase> {
    vec![
        make_case("gst_mp4_two_chunks", 30, 1, 60, 0, base_config()),
        make_case(
            "gst_mkv_partial_chunk",
            30, 1, 45, 0,
            RecorderConfig { container: ContainerFormat::Mkv, ..base_config() },
        ),
    ]
}

fn base_config() -> RecorderConfig {
    RecorderConfig {
        file_prefix: "it".into(),
        frame_wait_timeout_ms: 2000,
        ..Default::default()
    }
}

fn make_case(
    name: &str,
    framerate: u32,
    chunk_duration_secs: u32,
    frames: u64,
    latency_frames: usize,
    config: RecorderConfig,
) -> TestCase {
    let config = RecorderConfig { framerate, chunk_duration_secs, ..config };
    let expected = Expected {
        chunk_frames: expected_chunk_frames(frames, config.frames_per_chunk()),
        swapped_shader: swaps_shader(frames, config.color_tweak_interval),
    };

    TestCase {
        name: name.to_string(),
        config,
        frames,
        latency_frames,
        expected,
    }
}

/// Frames in each chunk when recording stops after `frames`
fn expected_chunk_frames(frames: u64, per_chunk: u64) -> Vec<u64> {
    let mut chunks = vec![per_chunk; (frames / per_chunk) as usize];
    let rest = frames % per_chunk;
    if rest > 0 || chunks.is_empty() {
        chunks.push(rest);
    }
    chunks
}

/// The swapped shader runs when some multiple of the interval is odd
fn swaps_shader(frames: u64, interval: Option<u32>) -> bool {
    match interval {
        Some(interval) => (0..frames).step_by(interval as usize).any(|f| f & 1 != 0),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_split() {
        assert_eq!(expected_chunk_frames(300, 150), vec![150, 150]);
        assert_eq!(expected_chunk_frames(130, 60), vec![60, 60, 10]);
        assert_eq!(expected_chunk_frames(60, 150), vec![60]);
    }

    #[test]
    fn matrix_names_are_unique() {
        let matrix = build_test_matrix();
        let mut names: Vec<_> = matrix.iter().map(|c| c.name.clone()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), matrix.len());
        assert!(matrix.iter().all(|c| c.config.validate().is_ok()));
    }

    #[test]
    fn odd_interval_swaps_even_interval_does_not() {
        assert!(swaps_shader(90, Some(15)));
        assert!(!swaps_shader(60, Some(10)));
        assert!(!swaps_shader(60, None));
    }
}
